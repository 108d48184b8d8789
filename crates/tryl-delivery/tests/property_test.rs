//! Property-based tests for batch correlation and retry timing.

use std::{sync::Arc, time::Duration};

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use tryl_core::{codes, TrylError};
use tryl_delivery::{
    BatchConfig, Batcher, Dispatcher, NoOpObserver, RetryExecutor, RetryPolicy,
};
use tryl_testing::{fixtures, strategies, ScriptedTransport};

fn policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..5_000, 1u64..60_000, 1.0f64..4.0, 0.0f64..=1.0).prop_map(
        |(base_ms, max_ms, multiplier, jitter_factor)| RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor,
        },
    )
}

proptest! {
    /// Every submission resolves with the receipt at its own position, even
    /// when identical events share a batch.
    #[test]
    fn submissions_resolve_in_position_order(
        picks in prop::collection::vec(0usize..3, 1..40),
        max_batch_size in 1usize..10,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(ScriptedTransport::new());
            let dispatcher = Arc::new(Dispatcher::new(
                transport.clone(),
                RetryExecutor::new(RetryPolicy::no_retry()),
            ));
            let config = BatchConfig {
                max_batch_size,
                flush_interval: Duration::from_secs(3600),
                max_pending_events: 64,
            };
            let batcher = Batcher::start(dispatcher, config, Arc::new(NoOpObserver)).unwrap();
            let cancel = CancellationToken::new();

            let mut sinks = Vec::new();
            for pick in &picks {
                sinks.push(batcher.enqueue(&cancel, fixtures::event(*pick)).await);
            }
            batcher.stop(&cancel).await.unwrap();

            for (position, sink) in sinks.into_iter().enumerate() {
                let receipt = sink.await.unwrap();
                assert_eq!(receipt.id, fixtures::receipt_id(position));
            }

            let sizes = transport.batch_sizes().await;
            assert!(sizes.iter().all(|size| *size >= 1 && *size <= max_batch_size), "{sizes:?}");
            assert_eq!(sizes.iter().sum::<usize>(), picks.len());

            let sent: Vec<_> = transport.batches().await.into_iter().flatten().collect();
            let submitted: Vec<_> = picks.iter().map(|pick| fixtures::event(*pick)).collect();
            assert_eq!(sent, submitted);
        });
    }

    /// Each position gets exactly one outcome: its explicit error, its
    /// receipt, or `MissingResponse` past the end of the results.
    #[test]
    fn batch_outcomes_cover_every_position(
        (submitted, response) in (1usize..50).prop_flat_map(|n| (Just(n), strategies::batch_response(n))),
    ) {
        let outcomes = response.outcomes(submitted);
        prop_assert_eq!(outcomes.len(), submitted);

        for (index, outcome) in outcomes.iter().enumerate() {
            let rejected = response.errors.iter().any(|error| error.index == index);
            match outcome {
                Err(error) if rejected => {
                    prop_assert_eq!(error.code(), Some(codes::VALIDATION_ERROR));
                },
                Ok(receipt) => {
                    prop_assert!(!rejected);
                    prop_assert_eq!(receipt, &response.results[index]);
                },
                Err(TrylError::MissingResponse { index: missing }) => {
                    prop_assert!(!rejected);
                    prop_assert_eq!(*missing, index);
                    prop_assert!(index >= response.results.len());
                },
                Err(other) => prop_assert!(false, "unexpected outcome {:?}", other),
            }
        }
    }

    /// Backoff never exceeds the cap, and jitter stays within its fraction
    /// of the capped delay.
    #[test]
    fn retry_delays_stay_within_bounds(policy in policy_strategy(), attempt in 0u32..64) {
        let max = policy.max_delay.as_secs_f64();
        let backoff = policy.backoff(attempt).as_secs_f64();
        let delay = policy.delay_for(attempt).as_secs_f64();

        prop_assert!(backoff <= max + 1e-9, "backoff {} over cap {}", backoff, max);
        prop_assert!(delay >= 0.0);
        prop_assert!(delay <= max * (1.0 + policy.jitter_factor) + 1e-6);
        prop_assert!((delay - backoff).abs() <= backoff * policy.jitter_factor + 1e-6);
    }

    /// With a multiplier of at least one, backoff never shrinks between
    /// attempts.
    #[test]
    fn backoff_is_monotonic(policy in policy_strategy(), attempt in 0u32..63) {
        prop_assert!(policy.backoff(attempt) <= policy.backoff(attempt + 1));
    }
}
