pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::relay::Relay;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    addr: String,
    relay: Arc<Relay>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, relay: Arc<Relay>, args: Args) -> Self {
        Self { addr, relay, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            self.start_http_server(http_port).await?;
        }

        self.start_ws_server().await?;

        Ok(())
    }

    async fn start_http_server(&self, http_port: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(
            http_port,
            self.relay.clone(),
            self.args.clone(),
        ).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(
            &self.addr,
            self.relay.clone(),
            self.args.server_api_key.clone(),
            self.args.clone(),
        ).await
    }
}
