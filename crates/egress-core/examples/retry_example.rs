//! Example: classified retries and adaptive timeouts
//!
//! This example demonstrates:
//! 1. Retrying a transient (retryable) failure with backoff
//! 2. Failing fast on a non-retryable error
//! 3. Feeding observed durations back into the timeout table
//!
//! Run with:
//! ```bash
//! cargo run -p egress-core --example retry_example
//! ```

use egress_core::prelude::*;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// A simulated page that refuses connections a few times
struct UnreliablePage {
    attempts: Arc<AtomicU32>,
    fail_count: u32,
    message: &'static str,
}

impl UnreliablePage {
    fn new(fail_count: u32, message: &'static str) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            fail_count,
            message,
        }
    }

    async fn load(&self) -> Result<String, std::io::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if attempt < self.fail_count {
            println!("  Attempt {}: FAILED ({})", attempt + 1, self.message);
            Err(std::io::Error::other(self.message))
        } else {
            println!("  Attempt {}: SUCCESS", attempt + 1);
            Ok("<html>dashboard</html>".to_string())
        }
    }

    fn total_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn context() -> ResilienceContext {
    let mut config = ResilienceConfig::default();
    config.timeouts.base_delay_ms = 100;
    config.timeouts.jitter_enabled = false;
    ResilienceContext::new(config)
}

/// Example 1: retryable failure
async fn example_retryable() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 1: Retrying a refused connection ===\n");

    let ctx = context();
    let page = UnreliablePage::new(2, "connect ECONNREFUSED 127.0.0.1:1080");
    let start = Instant::now();

    let body = ctx
        .retry()
        .execute_with_retry(|| page.load(), RetryOptions::new(classes::NAVIGATION).max_retries(3))
        .await?;

    println!(
        "\nGot {} bytes after {} attempts in {:?}",
        body.len(),
        page.total_attempts(),
        start.elapsed()
    );
    Ok(())
}

/// Example 2: non-retryable failure
async fn example_fail_fast() {
    println!("\n=== Example 2: Failing fast on bad credentials ===\n");

    let ctx = context();
    let page = UnreliablePage::new(10, "login failed: invalid password");

    let result = ctx
        .retry()
        .execute_with_retry(|| page.load(), RetryOptions::new("login").max_retries(3))
        .await;

    match result {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!(
            "\nGave up after {} attempt(s): {} [{}]",
            page.total_attempts(),
            e,
            ctx.classifier().classify(&e)
        ),
    }
}

/// Example 3: adaptive timeouts
fn example_adaptive() {
    println!("\n=== Example 3: Adaptive timeouts ===\n");

    let ctx = context();
    let before = ctx.timeouts().get_timeout(classes::NAVIGATION);

    for _ in 0..8 {
        ctx.adaptive()
            .record_performance(classes::NAVIGATION, Duration::from_millis(900), true, None);
    }

    let after = ctx.timeouts().get_timeout(classes::NAVIGATION);
    println!("navigation timeout: {:?} -> {:?}", before, after);

    if let Some(stats) = ctx.adaptive().get_performance_stats(classes::NAVIGATION) {
        println!(
            "{} samples, {:.0}% success, avg {:?}",
            stats.count,
            stats.success_rate * 100.0,
            stats.avg_duration
        );
    }
    println!("metrics: {:#?}", ctx.monitor().metrics());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    example_retryable().await?;
    example_fail_fast().await;
    example_adaptive();
    Ok(())
}
