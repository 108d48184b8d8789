//! Retry and decoding behaviour of the dispatcher over a scripted transport.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tryl_core::{EventFilter, EventList, TrylError};
use tryl_delivery::{Dispatcher, RetryExecutor, RetryPolicy, TransportError};
use tryl_testing::{fixtures, ScriptedReply, ScriptedTransport};

fn policy(max_attempts: u32, base_secs: u64, max_secs: u64, multiplier: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_secs(base_secs),
        max_delay: Duration::from_secs(max_secs),
        multiplier,
        jitter_factor: 0.0,
    }
}

fn dispatcher(transport: &Arc<ScriptedTransport>, policy: RetryPolicy) -> Dispatcher {
    Dispatcher::new(transport.clone(), RetryExecutor::new(policy))
}

#[tokio::test(start_paused = true)]
async fn transient_transport_failures_are_retried_with_backoff() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error(TransportError::Timeout("deadline elapsed".to_string())).await;
    transport.push_error(TransportError::Connect("connection reset".to_string())).await;
    let dispatcher = dispatcher(&transport, policy(3, 1, 30, 2.0));
    let started = Instant::now();

    let receipt = dispatcher.log(&CancellationToken::new(), &fixtures::event(1)).await.unwrap();

    assert_eq!(receipt.id, fixtures::receipt_id(0));
    assert_eq!(transport.request_count(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "waited {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_at_max_delay() {
    let transport = Arc::new(ScriptedTransport::failing(ScriptedReply::connection_refused()));
    let dispatcher = dispatcher(&transport, policy(5, 1, 2, 10.0));
    let started = Instant::now();

    let error = dispatcher.log(&CancellationToken::new(), &fixtures::event(1)).await.unwrap_err();

    assert!(matches!(error, TrylError::RetriesExhausted { attempts: 5, .. }));
    assert_eq!(transport.request_count(), 5);
    // 1s, then 2s three times.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "waited {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_not_retried() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error(TransportError::InvalidRequest("bad header value".to_string())).await;
    let dispatcher = dispatcher(&transport, policy(3, 1, 30, 2.0));

    let error = dispatcher.log(&CancellationToken::new(), &fixtures::event(1)).await.unwrap_err();

    assert_eq!(
        error,
        TrylError::Network {
            operation: "request".to_string(),
            message: "invalid request: bad header value".to_string(),
            temporary: false,
        }
    );
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn undecodable_success_body_is_a_decode_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(201, &json!(["not", "a", "receipt"])).await;
    let dispatcher = dispatcher(&transport, policy(3, 1, 30, 2.0));

    let error = dispatcher.log(&CancellationToken::new(), &fixtures::event(1)).await.unwrap_err();

    assert!(matches!(error, TrylError::Decode { .. }));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_retrying() {
    let transport = Arc::new(ScriptedTransport::failing(ScriptedReply::connection_refused()));
    let dispatcher = dispatcher(&transport, policy(3, 10, 30, 2.0));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    });

    let error = dispatcher.log(&cancel, &fixtures::event(1)).await.unwrap_err();

    assert_eq!(error, TrylError::Cancelled);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn list_passes_filter_as_query_pairs() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_json(200, &EventList::default()).await;
    let dispatcher = dispatcher(&transport, RetryPolicy::no_retry());

    let filter = EventFilter {
        target_type: Some("document".to_string()),
        offset: Some(40),
        ..Default::default()
    };
    let page = dispatcher.list(&CancellationToken::new(), &filter).await.unwrap();

    assert!(page.events.is_empty());
    let requests = transport.requests().await;
    assert_eq!(requests[0].path, "/v1/events");
    assert_eq!(
        requests[0].query,
        vec![
            ("target_type".to_string(), "document".to_string()),
            ("offset".to_string(), "40".to_string()),
        ]
    );
    assert!(requests[0].body.is_none());
}
