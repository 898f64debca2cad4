//! JSON HTTP surface over a [`VoteLedger`].

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use serde_json::json;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::LedgerError;
use crate::ledger::VoteLedger;

#[derive(Deserialize, Debug)]
pub struct VoteRequest {
    pub voter_id: Option<String>,
    pub candidate: Option<String>,
    #[serde(default)]
    pub voter_display_name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl LedgerError {
    fn kind(&self) -> &'static str {
        match self {
            LedgerError::MissingVoterId => "missing_voter_id",
            LedgerError::InvalidCandidate(_) => "invalid_candidate",
            LedgerError::DuplicateVoter(_) => "duplicate_voter",
            LedgerError::BlockNotFound(_) => "block_not_found",
            LedgerError::ConsensusRejected { .. } => "consensus_rejected",
            LedgerError::MiningCancelled => "mining_cancelled",
            LedgerError::MiningTimedOut { .. } => "mining_timed_out",
            LedgerError::StaleProposal => "stale_proposal",
            LedgerError::ProposalInProgress => "proposal_in_progress",
            LedgerError::Worker(_) => "worker_failed",
            LedgerError::Panel(_) => "invalid_panel",
            LedgerError::Config(_) => "invalid_config",
        }
    }
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::MissingVoterId | LedgerError::InvalidCandidate(_) => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::DuplicateVoter(_) | LedgerError::ProposalInProgress => {
                StatusCode::CONFLICT
            }
            LedgerError::BlockNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::ConsensusRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::MiningCancelled
            | LedgerError::MiningTimedOut { .. }
            | LedgerError::StaleProposal => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Worker(_) | LedgerError::Panel(_) | LedgerError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

async fn submit_vote(
    ledger: web::Data<VoteLedger>,
    vote: web::Json<VoteRequest>,
) -> Result<HttpResponse, LedgerError> {
    let vote = vote.into_inner();
    let voter_id = vote.voter_id.ok_or(LedgerError::MissingVoterId)?;
    let candidate = vote.candidate.unwrap_or_default();

    let outcome = ledger
        .submit_vote(&voter_id, &candidate, vote.voter_display_name)
        .await?;
    Ok(HttpResponse::Created().json(outcome))
}

async fn mine(ledger: web::Data<VoteLedger>) -> Result<HttpResponse, LedgerError> {
    let block = ledger.mine().await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Block mined successfully",
        "block": block,
    })))
}

async fn cancel_mining(ledger: web::Data<VoteLedger>) -> HttpResponse {
    let cancelled = ledger.cancel_mining().await;
    HttpResponse::Ok().json(json!({ "cancelled": cancelled }))
}

async fn validate(ledger: web::Data<VoteLedger>) -> Result<HttpResponse, LedgerError> {
    let accepted = ledger.propose_and_validate().await?;
    Ok(HttpResponse::Ok().json(json!({
        "accepted": accepted,
        "validators": ledger.validator_status(),
    })))
}

async fn chain_page(ledger: web::Data<VoteLedger>, query: web::Query<PageQuery>) -> HttpResponse {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    HttpResponse::Ok().json(ledger.get_chain_page(page, page_size).await)
}

async fn block(
    ledger: web::Data<VoteLedger>,
    index: web::Path<u64>,
) -> Result<HttpResponse, LedgerError> {
    let block = ledger.get_block(index.into_inner()).await?;
    Ok(HttpResponse::Ok().json(block))
}

async fn results(ledger: web::Data<VoteLedger>) -> HttpResponse {
    HttpResponse::Ok().json(ledger.get_results().await)
}

async fn pending(ledger: web::Data<VoteLedger>) -> HttpResponse {
    let votes = ledger.pending_votes().await;
    HttpResponse::Ok().json(json!({
        "count": votes.len(),
        "votes": votes,
        "mining": ledger.is_mining().await,
    }))
}

async fn validators(ledger: web::Data<VoteLedger>) -> HttpResponse {
    HttpResponse::Ok().json(ledger.validator_status())
}

async fn verify(ledger: web::Data<VoteLedger>) -> HttpResponse {
    HttpResponse::Ok().json(ledger.verify_chain().await)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/vote", web::post().to(submit_vote))
        .route("/mine", web::get().to(mine))
        .route("/mine/cancel", web::post().to(cancel_mining))
        .route("/validate", web::post().to(validate))
        .route("/chain", web::get().to(chain_page))
        .route("/blocks/{index}", web::get().to(block))
        .route("/results", web::get().to(results))
        .route("/pending", web::get().to(pending))
        .route("/validators", web::get().to(validators))
        .route("/verify", web::get().to(verify));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use actix_web::{test, App};
    use serde_json::Value;

    async fn ledger() -> VoteLedger {
        VoteLedger::from_config(LedgerConfig {
            difficulty: "0".to_string(),
            ..LedgerConfig::default()
        })
        .await
        .unwrap()
    }

    #[actix_web::test]
    async fn vote_then_read_results() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ledger().await))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/vote")
            .set_json(json!({ "voter_id": "alice", "candidate": "A" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "committed");
        assert_eq!(body["block"]["index"], 2);

        let req = test::TestRequest::get().uri("/results").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["counts"]["A"], 1);
        assert_eq!(body["percentages"]["A"], 100.0);
        assert_eq!(body["total"], 1);
    }

    #[actix_web::test]
    async fn errors_map_to_status_codes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ledger().await))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/vote")
            .set_json(json!({ "candidate": "A" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/vote")
            .set_json(json!({ "voter_id": "bob", "candidate": "Z" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_candidate");

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let req = test::TestRequest::post()
                .uri("/vote")
                .set_json(json!({ "voter_id": "bob", "candidate": "B" }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }

        let req = test::TestRequest::get().uri("/blocks/42").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn chain_pages_and_verification() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ledger().await))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/mine").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["block"]["index"], 2);

        let req = test::TestRequest::get().uri("/chain?page=1&page_size=1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["current_page"], 1);
        assert_eq!(body["blocks"][0]["index"], 1);

        let req = test::TestRequest::get().uri("/chain?page=9").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["blocks"].as_array().map(Vec::len), Some(0));

        let req = test::TestRequest::get().uri("/verify").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["length"], 2);

        let req = test::TestRequest::post().uri("/validate").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["accepted"], true);
        assert_eq!(body["validators"][0]["last_verdict"], true);
    }
}
