//! Fetch a URL through the full resilience pipeline.
//!
//! ```sh
//! cargo run --example resilient_fetch -- https://httpbin.org/status/503
//! ```
//!
//! Watch the logs: transient statuses are retried with backoff, and
//! repeated failures open the circuit for the target.

use sisu_runtime::{ClientConfig, FaultError, RequestOptions, ResilientClient, RetryPolicy};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), FaultError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sisu_runtime=debug".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/status/200".to_string());

    let client = ResilientClient::with_reqwest(ClientConfig {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::aggressive(),
        verbose: true,
        ..Default::default()
    })?;

    match client.get(&url, RequestOptions::default()).await {
        Ok(response) => {
            println!("status {}", response.status);
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        Err(e) => println!("request failed: {e}"),
    }

    for stats in client.circuit_stats(None) {
        println!(
            "circuit {} state={} failures={} rejected={}",
            stats.target,
            stats.state.as_str(),
            stats.failure_count,
            stats.rejected
        );
    }
    Ok(())
}
