use clap::Parser;
use scry_server::ServerConfig;
use scry_telemetry::TelemetryConfig;

/// Relay hub for remote state inspection.
#[derive(Parser, Debug)]
#[command(name = "scry", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9123)]
    port: u16,

    /// Outbound queue depth per connected peer.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,

    /// Emit JSON log lines instead of human-readable output.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    scry_telemetry::init_telemetry(&TelemetryConfig {
        json_output: args.json_logs,
        ..Default::default()
    });

    tracing::info!("starting scry hub");

    let config = ServerConfig {
        port: args.port,
        max_send_queue: args.max_send_queue,
        ..Default::default()
    };
    let handle = scry_server::start(config).await?;
    tracing::info!(port = handle.port, "scry hub ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
