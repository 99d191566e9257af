use mcp_vm_bridge::config::ServerConfig;
use mcp_vm_bridge::server::McpServer;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`tracing` directive syntax).
const LOG_FILTER_ENV: &str = "VM_BRIDGE_LOG";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-vm-bridge: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let mut server = match McpServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mcp-vm-bridge: startup error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("serving on stdio");
    if let Err(e) = server.run().await {
        eprintln!("mcp-vm-bridge: fatal error: {e}");
        std::process::exit(1);
    }
}
