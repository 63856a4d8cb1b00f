pub mod chat;
pub mod relay;
pub mod websocket;
