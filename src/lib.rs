pub mod cli;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;

use cli::Args;
use log::info;
use relay::Relay;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", args.server_addr);
    match args.http_port {
        Some(port) => info!("HTTP API Port: {}", port),
        None => info!("HTTP API: disabled"),
    }
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("History Store Type: {}", args.history_type);
    if args.history_type.to_lowercase() != "memory" {
        info!("History Store Host: {}", args.history_host);
    }
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let relay = Arc::new(Relay::new(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, relay, args);
    server.run().await?;

    Ok(())
}
