//! Example: supervising the proxy daemon and rotating the egress IP
//!
//! Requires the daemon binary, a config template and the secret:
//! ```bash
//! export WARP_IP_ROTATION=true
//! export WIREPROXY_CONFIG_PATH=./wireproxy.conf
//! export WARP_PRIVATE_KEY=...
//! cargo run -p egress-proxy --example rotate_example
//! ```

use egress_core::monitor::{LogLevel, init_tracing};
use egress_proxy::{ProxyConfig, ProxySupervisor};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing(LogLevel::Info);

    let config = ProxyConfig::from_dotenv()?;
    if !config.enabled {
        println!("Set WARP_IP_ROTATION=true to run this example");
        return Ok(());
    }

    let supervisor = ProxySupervisor::new(config)?;
    tokio::spawn(egress_proxy::signal::shutdown_on_signal(supervisor.clone()));

    supervisor.start(None).await?;
    println!("egress IP: {}", supervisor.get_current_egress_ip(None).await?);

    for round in 1..=3 {
        let subject = format!("round-{}", round);
        match supervisor.rotate_ip(Some(&subject)).await {
            Ok(Some(rotation)) => println!(
                "{}: {:?} -> {} (changed: {}, {:?})",
                subject, rotation.old_ip, rotation.new_ip, rotation.changed, rotation.duration
            ),
            Ok(None) => println!("rotation disabled"),
            Err(e) => println!("{}: rotation failed: {}", subject, e),
        }
    }

    println!("{:#?}", supervisor.status().await);
    println!("{:#?}", supervisor.monitor().metrics());

    supervisor.cleanup().await;
    Ok(())
}
