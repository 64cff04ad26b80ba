//! End-to-end tests: retries inside a controlled loop, sharing one context.

use egress_core::monitor::categories;
use egress_core::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn quiet_context() -> ResilienceContext {
    let mut config = ResilienceConfig::default();
    config.timeouts.jitter_enabled = false;
    config.timeouts.base_delay_ms = 10;
    ResilienceContext::new(config)
}

#[tokio::test(start_paused = true)]
async fn test_loop_of_retried_tasks_records_metrics() {
    let ctx = quiet_context();
    let controller = LoopController::new(LoopConfig {
        max_iterations: Some(3),
        delay_between_iterations: Duration::from_millis(50),
        timeout_per_iteration: Some(Duration::from_secs(10)),
    });
    let calls = Arc::new(AtomicU32::new(0));

    let outcome = controller
        .execute(
            |iteration| {
                let ctx = ctx.clone();
                let calls = calls.clone();
                async move {
                    // Every task fails once with a transient error, then succeeds.
                    let failed_once = AtomicU32::new(0);
                    ctx.retry()
                        .execute_with_retry(
                            || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                let first = failed_once.fetch_add(1, Ordering::SeqCst) == 0;
                                async move {
                                    if first {
                                        Err(std::io::Error::other("HTTP 503 Service Unavailable"))
                                    } else {
                                        Ok(())
                                    }
                                }
                            },
                            RetryOptions::new(classes::NETWORK)
                                .subject(format!("acct-{}", iteration.iteration)),
                        )
                        .await
                }
            },
            LoopOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.phase, LoopPhase::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let monitor = ctx.monitor();
    assert_eq!(monitor.metric(categories::RETRIES, "network_success"), 3);
    assert_eq!(monitor.metric(categories::RETRIES, "network_failures"), 3);
    assert_eq!(monitor.metric(categories::ERRORS, "temporary_failure"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_surfaces_through_loop_policy() {
    let ctx = quiet_context();
    let controller = LoopController::new(LoopConfig {
        max_iterations: Some(2),
        delay_between_iterations: Duration::ZERO,
        timeout_per_iteration: None,
    });
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let outcome = controller
        .execute(
            |_iteration| {
                let ctx = ctx.clone();
                async move {
                    ctx.retry()
                        .execute_with_retry(
                            || async { Err::<(), _>(std::io::Error::other("operation timed out")) },
                            RetryOptions::new(classes::NETWORK).max_retries(1),
                        )
                        .await
                }
            },
            LoopOptions::new().on_error({
                let seen = seen.clone();
                move |err| {
                    seen.lock().unwrap().push(err.to_string());
                    true
                }
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 2);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("operation timed out"));
    assert_eq!(ctx.monitor().metric(categories::RETRIES, "network_exhausted"), 2);
}

#[test]
fn test_classifier_drives_retryability() {
    let ctx = ResilienceContext::default();
    let classifier = ctx.classifier();

    let refused = std::io::Error::other("connect ECONNREFUSED 127.0.0.1:1080");
    let auth = std::io::Error::other("server answered 403");

    assert!(ctx.retry().is_retryable(classifier.classify(&refused)));
    assert!(!ctx.retry().is_retryable(classifier.classify(&auth)));
    assert!(!ctx.retry().is_retryable(ErrorClass::Unknown));
}
