//! Example: driving a task loop with pause, resume and stop
//!
//! Run with:
//! ```bash
//! cargo run -p egress-core --example loop_example
//! ```

use egress_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let controller = Arc::new(LoopController::new(LoopConfig {
        max_iterations: Some(6),
        delay_between_iterations: Duration::from_millis(200),
        timeout_per_iteration: Some(Duration::from_millis(500)),
    }));

    let runner = tokio::spawn({
        let controller = controller.clone();
        async move {
            controller
                .execute(
                    |ctx| async move {
                        println!("  iteration {} for {:?}", ctx.iteration, ctx.subject_id);
                        if ctx.iteration == 4 {
                            // Too slow: the controller times this iteration out.
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        Ok::<_, std::io::Error>(())
                    },
                    LoopOptions::new()
                        .subject("acct-1")
                        .on_error(|err| {
                            println!("  error: {}", err);
                            true
                        })
                        .on_loop_complete(|outcome| println!("  finished: {:?}", outcome)),
                )
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.pause();
    println!("paused: {:?}", controller.status());

    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.resume();
    println!("resumed");

    match runner.await {
        Ok(Ok(outcome)) => println!("outcome: {:?}", outcome),
        Ok(Err(e)) => println!("loop failed: {}", e),
        Err(e) => println!("loop task panicked: {}", e),
    }
}
