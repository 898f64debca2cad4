use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use vote_ledger::hasher::{hash_block, HASH_HEX_LEN};
use vote_ledger::merkle::merkle_root;
use vote_ledger::models::{Block, Candidate, Vote, GENESIS_PREVIOUS_HASH};
use vote_ledger::pow::ProofOfWork;
use vote_ledger::views;

fn arb_vote() -> impl Strategy<Value = Vote> {
    (
        "[a-z0-9]{1,12}",
        prop_oneof![Just(Candidate::A), Just(Candidate::B)],
        proptest::option::of("[A-Za-z ]{1,16}"),
        any::<u64>(),
    )
        .prop_map(|(voter_id, candidate, voter_display_name, timestamp)| Vote {
            voter_id,
            candidate,
            voter_display_name,
            timestamp,
        })
}

proptest! {
    /// Hashing is pure: identical fields give identical digests.
    #[test]
    fn hash_is_deterministic(
        nonce in any::<u64>(),
        votes in prop::collection::vec(arb_vote(), 0..6),
        timestamp in any::<u64>(),
    ) {
        let first = hash_block(nonce, GENESIS_PREVIOUS_HASH, &votes, timestamp);
        let second = hash_block(nonce, GENESIS_PREVIOUS_HASH, &votes, timestamp);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), HASH_HEX_LEN);
    }

    /// A block built from a solution re-hashes to its stored hash.
    #[test]
    fn solved_block_round_trips(
        votes in prop::collection::vec(arb_vote(), 0..4),
        timestamp in any::<u64>(),
    ) {
        let pow = ProofOfWork::new("0").unwrap();
        let solution = pow
            .solve(GENESIS_PREVIOUS_HASH, &votes, timestamp, &CancellationToken::new())
            .unwrap();
        prop_assert!(solution.hash.starts_with('0'));

        let block = Block {
            index: 2,
            votes,
            merkle_root: None,
            nonce: solution.nonce,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            timestamp,
            hash: solution.hash,
        };
        prop_assert_eq!(block.compute_hash(), block.hash);
    }

    /// Same ordered ids, same root; non-empty lists always have a root.
    #[test]
    fn merkle_root_is_deterministic(ids in prop::collection::vec("[a-z]{1,8}", 1..20)) {
        let root = merkle_root(&ids);
        prop_assert!(root.is_some());
        prop_assert_eq!(root, merkle_root(&ids));
    }

    /// Swapping two distinct ids changes the root.
    #[test]
    fn merkle_root_depends_on_order(
        ids in prop::collection::hash_set("[a-z]{1,8}", 2..10),
    ) {
        let mut ids: Vec<String> = ids.into_iter().collect();
        let original = merkle_root(&ids);
        ids.swap(0, 1);
        prop_assert_ne!(original, merkle_root(&ids));
    }

    /// Pages never overlap and together cover the chain exactly once.
    #[test]
    fn pages_partition_the_chain(len in 0u64..60, page_size in 1usize..15) {
        let chain: Vec<Block> = (1..=len)
            .map(|index| Block {
                index,
                votes: Vec::new(),
                merkle_root: None,
                nonce: 0,
                previous_hash: String::new(),
                timestamp: 0,
                hash: String::new(),
            })
            .collect();

        let total_pages = views::chain_page(&chain, 1, page_size).total_pages;
        let collected: Vec<u64> = (1..=total_pages + 1)
            .flat_map(|p| views::page(&chain, p, page_size).iter().map(|b| b.index).collect::<Vec<_>>())
            .collect();
        prop_assert_eq!(collected, (1..=len).collect::<Vec<_>>());
    }
}
