//! Property tests for history compaction

mod common;

use chat_engine::context::compactor::{CompactionConfig, ContextCompactor};
use chat_engine::context::token_estimator::WordBasedEstimator;
use chat_engine::context::ContextTurn;
use chat_engine::conversation::Role;
use common::CountingSummarizer;
use proptest::prelude::*;
use std::sync::Arc;

fn compactor(summarizer: Arc<CountingSummarizer>) -> ContextCompactor {
    ContextCompactor::new(
        Arc::new(WordBasedEstimator::new(1.0)),
        summarizer,
        CompactionConfig::default(),
    )
}

fn history() -> impl Strategy<Value = Vec<ContextTurn>> {
    prop::collection::vec(
        (any::<bool>(), prop::collection::vec("[a-z]{1,8}", 0..40)),
        1..30,
    )
    .prop_map(|turns| {
        turns
            .into_iter()
            .map(|(from_user, words)| {
                let text = words.join(" ");
                if from_user {
                    ContextTurn::user(text)
                } else {
                    ContextTurn::assistant(text)
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn compaction_never_empties_history(turns in history(), budget in 0usize..600) {
        let summarizer = Arc::new(CountingSummarizer::default());
        let compactor = compactor(summarizer);

        let result = tokio_test::block_on(compactor.compact_and_fit(&turns, budget));

        prop_assert!(!result.turns.is_empty());
        prop_assert!((0.0..=100.0).contains(&result.usage_percent));
        prop_assert_eq!(result.turns.last(), turns.last());

        let retained: Vec<&ContextTurn> = result
            .turns
            .iter()
            .filter(|t| t.role != Role::System)
            .collect();
        let suffix: Vec<&ContextTurn> = turns[result.dropped..].iter().collect();
        prop_assert_eq!(retained, suffix);
    }

    #[test]
    fn compaction_is_idempotent(turns in history(), budget in 0usize..600) {
        let summarizer = Arc::new(CountingSummarizer::default());
        let compactor = compactor(summarizer.clone());

        let first = tokio_test::block_on(compactor.compact_and_fit(&turns, budget));
        let second = tokio_test::block_on(compactor.compact_and_fit(&turns, budget));

        prop_assert_eq!(first, second);
        prop_assert!(summarizer.calls() <= 1);
    }
}

#[tokio::test]
async fn test_three_short_turns_fit_without_summary() {
    let summarizer = Arc::new(CountingSummarizer::default());
    let compactor = compactor(summarizer.clone());
    let turns = vec![
        ContextTurn::user("hi"),
        ContextTurn::assistant("hello"),
        ContextTurn::user("how are you"),
    ];

    let result = compactor.compact_and_fit(&turns, 100_000).await;

    assert_eq!(result.dropped, 0);
    assert_eq!(result.turns, turns);
    assert_eq!(summarizer.calls(), 0);
}

#[tokio::test]
async fn test_oldest_five_of_eight_are_summarized() {
    let summarizer = Arc::new(CountingSummarizer::default());
    let compactor = ContextCompactor::new(
        Arc::new(WordBasedEstimator::new(1.0)),
        summarizer.clone(),
        CompactionConfig {
            per_turn_overhead: 0,
            ..Default::default()
        },
    );
    let turns: Vec<ContextTurn> = (0..8)
        .map(|i| ContextTurn::user(format!("turn {} a b c d e f g h", i)))
        .collect();

    let result = compactor.compact_and_fit(&turns, 30).await;

    assert_eq!(result.dropped, 5);
    assert_eq!(result.synopsis.as_deref(), Some("5 earlier turns"));
    assert_eq!(result.turns[0].role, Role::System);
    assert_eq!(&result.turns[1..], &turns[5..]);
    assert_eq!(summarizer.calls(), 1);
}
