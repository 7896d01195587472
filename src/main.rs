use agent_bridge::gateway::EndpointClient;
use agent_bridge::server::{self, BridgeConfig};
use clap::Parser;
use std::time::Duration;
use tokio::signal;

/// Built-in default when neither --endpoint nor SERVING_ENDPOINT is set.
const DEFAULT_ENDPOINT: &str = "agent-supervisor";

#[derive(Parser, Debug)]
#[command(
    name = "agent-bridge",
    about = "Chat backend bridging a web frontend to a model-serving endpoint"
)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Serving endpoint name; falls back to SERVING_ENDPOINT, then the
    /// built-in default
    #[arg(long)]
    endpoint: Option<String>,

    /// Output token budget passed to the endpoint
    #[arg(long, default_value_t = 2000)]
    max_tokens: u32,

    /// Outbound request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Number of chat exchanges kept in memory
    #[arg(long, default_value_t = 100)]
    history_capacity: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let endpoint_name = args
        .endpoint
        .or_else(|| std::env::var("SERVING_ENDPOINT").ok())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let base_url = std::env::var("DATABRICKS_HOST")
        .map_err(|_| anyhow::anyhow!("DATABRICKS_HOST is not set"))?;
    let token = std::env::var("DATABRICKS_TOKEN").ok();

    let gateway = EndpointClient::new(base_url, token, Duration::from_secs(args.timeout))?;
    let config = BridgeConfig {
        host: args.host,
        port: args.port,
        endpoint_name,
        max_tokens: args.max_tokens,
        history_capacity: args.history_capacity,
    };

    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            res = server::startup(config, gateway) => {
                res.map_err(anyhow::Error::from)
            }
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down");
                Ok(())
            }
        }
    })
}
