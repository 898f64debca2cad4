use std::io;

use actix_web::{web, App, HttpServer};
use log::info;

use vote_ledger::{api, Config, VoteLedger};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    info!("starting with {:?}", config);

    let ledger = VoteLedger::from_config(config.ledger.clone())
        .await
        .map_err(io::Error::other)?;
    let state = web::Data::new(ledger);

    info!("listening on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
