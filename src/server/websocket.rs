use crate::models::relay::{ Envelope, Source };
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::relay::Relay;
use crate::cli::Args;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::collections::HashMap;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use hmac::{ Hmac, Mac };
use sha2::Sha256;
use chrono::Utc;
use url::form_urlencoded;

use log::{ info, warn, error };
use futures::{ SinkExt, StreamExt };
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;
const AUTH_TS_WINDOW_SECS: i64 = 300;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

/// Checks the `ts`/`sig` query pair against the server key: `ts` must be a
/// unix timestamp within the allowed window and `sig` the hex HMAC-SHA256 of
/// it. Header-style aliases are accepted for clients that cannot set both.
fn verify_query_auth(secret: &str, query: &str, now: i64) -> Result<(), &'static str> {
    let params: HashMap<String, String> =
        form_urlencoded::parse(query.as_bytes()).into_owned().collect();

    let ts = params.get("ts")
        .or_else(|| params.get("X-Api-Ts"))
        .map(|s| s.as_str());
    let sig = params.get("sig")
        .or_else(|| params.get("X-Api-Sign"))
        .map(|s| s.as_str());

    match (ts, sig) {
        (Some(ts), Some(sig)) => {
            let ts_i: i64 = ts.parse().unwrap_or(0);
            if (now - ts_i).abs() > AUTH_TS_WINDOW_SECS {
                return Err("timestamp out of range");
            }

            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| "invalid server key")?;
            mac.update(ts.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());

            if expected == sig {
                Ok(())
            } else {
                Err("bad signature")
            }
        }
        _ => Err("missing ts/sig"),
    }
}

pub async fn start_ws_server(
    addr: &str,
    relay: Arc<Relay>,
    api_key: Option<String>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let protocol = if
        args.enable_tls &&
        args.tls_cert_path.is_some() &&
        args.tls_key_path.is_some()
    {
        "wss"
    } else {
        "ws"
    };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Some(TlsAcceptor::from(config))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        None
    };

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let relay_clone = Arc::clone(&relay);
        let required_api_key = api_key.clone();
        let tls_acceptor_clone = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor_clone {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(
                            peer,
                            tls_stream,
                            relay_clone,
                            required_api_key
                        ).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, relay_clone, required_api_key).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    relay: Arc<Relay>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let secret = match &required_api_key {
            Some(k) if !k.is_empty() => k,
            _ => return Ok(response),
        };

        let qs = req.uri().query().unwrap_or("");
        match verify_query_auth(secret, qs, Utc::now().timestamp()) {
            Ok(()) => Ok(response),
            Err(reason) => {
                warn!("Rejected WebSocket handshake from {}: {}", peer, reason);
                let res = Response::builder()
                    .status(401)
                    .body(Some(reason.to_string()))
                    .unwrap();
                Err(ErrorResponse::from(res))
            }
        }
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            handle_connection(peer, ws, relay).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    relay: Arc<Relay>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    // Fallback conversation id for frames that carry no chat_id.
    let connection_chat_id = Uuid::new_v4().to_string();
    info!("Assigned conversation ID {} to {}", connection_chat_id, peer);

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(message) => {
                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let reply = ServerMessage::Error {
                        message: "Message too large".to_string(),
                    };
                    if tx.send(encode(&reply)).await.is_err() {
                        error!("Failed to send size limit error to {}", peer);
                    }
                    break;
                }

                match message {
                    Message::Text(text) => {
                        let reply = handle_frame(&relay, &connection_chat_id, &text).await;
                        if let Err(e) = tx.send(encode(&reply)).await {
                            error!("Error sending response to {}: {}", peer, e);
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Ping(ping_data) => {
                        if tx.send(Message::Pong(ping_data)).await.is_err() {
                            error!("Failed to send pong to {}", peer);
                            break;
                        }
                    }
                    Message::Pong(_) => {/* Usually ignore pongs */}
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Message::Frame(_) => {/* Usually ignore raw frames */}
                }
            }
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        }
    }
    info!("WebSocket connection closed for {} (Conv ID: {})", peer, connection_chat_id);
}

/// One inbound text frame to one reply frame. Malformed JSON and unknown
/// sources answer with error frames; the connection stays open.
async fn handle_frame(
    relay: &Relay,
    connection_chat_id: &str,
    text: &str
) -> ServerMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Chat { source, content, chat_id }) => {
            let conversation_id = chat_id.as_deref().unwrap_or(connection_chat_id).to_string();
            match source.parse::<Source>() {
                Ok(source) => {
                    let envelope = relay
                        .send_message(&content, Some(&conversation_id), source).await;
                    ServerMessage::Response { envelope }
                }
                Err(err) =>
                    ServerMessage::Response {
                        envelope: Envelope::failure(conversation_id, err.to_string()),
                    },
            }
        }
        Ok(ClientMessage::History { chat_id }) => {
            let conversation_id = chat_id.as_deref().unwrap_or(connection_chat_id).to_string();
            match relay.get_history(&conversation_id).await {
                Ok(messages) =>
                    ServerMessage::History {
                        chat_id: conversation_id,
                        messages,
                    },
                Err(e) => {
                    error!("History lookup failed for {}: {}", conversation_id, e);
                    ServerMessage::Error {
                        message: format!("History store error: {}", e),
                    }
                }
            }
        }
        Err(e) =>
            ServerMessage::Error {
                message: format!("Failed to parse message: {}", e),
            },
    }
}

fn encode(msg: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryHistoryStore;
    use crate::llm::chat::{ ChatClient, CompletionResponse };
    use crate::models::relay::Status;
    use async_trait::async_trait;
    use std::error::Error as StdError;

    struct EchoClient;

    #[async_trait]
    impl ChatClient for EchoClient {
        async fn complete(
            &self,
            prompt: &str
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            Ok(CompletionResponse { response: format!("echo: {}", prompt) })
        }

        fn model(&self) -> String {
            "echo".to_string()
        }

        fn base_url(&self) -> Option<String> {
            None
        }
    }

    fn test_relay() -> Relay {
        Relay::with_parts(Arc::new(EchoClient), Arc::new(MemoryHistoryStore::new()))
    }

    fn sign(secret: &str, ts: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signed_handshake_is_accepted() {
        let now = 1_700_000_000;
        let query = format!("ts={}&sig={}", now, sign("secret", now));
        assert!(verify_query_auth("secret", &query, now).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let ts = 1_700_000_000;
        let query = format!("ts={}&sig={}", ts, sign("secret", ts));
        let now = ts + AUTH_TS_WINDOW_SECS + 1;
        assert_eq!(verify_query_auth("secret", &query, now), Err("timestamp out of range"));
    }

    #[test]
    fn bad_signature_is_rejected() {
        let now = 1_700_000_000;
        let query = format!("ts={}&sig={}", now, sign("wrong-key", now));
        assert_eq!(verify_query_auth("secret", &query, now), Err("bad signature"));
    }

    #[test]
    fn missing_params_are_rejected() {
        assert_eq!(verify_query_auth("secret", "", 0), Err("missing ts/sig"));
        assert_eq!(verify_query_auth("secret", "ts=123", 0), Err("missing ts/sig"));
    }

    #[tokio::test]
    async fn chat_frame_falls_back_to_the_connection_conversation() {
        let relay = test_relay();
        let reply = handle_frame(
            &relay,
            "conn-1",
            r#"{"type":"chat","source":"vscode","content":"Hi"}"#
        ).await;

        match reply {
            ServerMessage::Response { envelope } => {
                assert_eq!(envelope.status, Status::Success);
                assert_eq!(envelope.chat_id, "conn-1");
                assert_eq!(envelope.response.as_deref(), Some("echo: Hi"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn chat_frame_with_explicit_chat_id_keeps_it() {
        let relay = test_relay();
        let reply = handle_frame(
            &relay,
            "conn-1",
            r#"{"type":"chat","source":"react","content":"Hi","chat_id":"react-456"}"#
        ).await;

        match reply {
            ServerMessage::Response { envelope } => {
                assert_eq!(envelope.chat_id, "react-456");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_source_answers_with_a_validation_envelope() {
        let relay = test_relay();
        let reply = handle_frame(
            &relay,
            "conn-1",
            r#"{"type":"chat","source":"slack","content":"Hi"}"#
        ).await;

        match reply {
            ServerMessage::Response { envelope } => {
                assert_eq!(envelope.status, Status::Error);
                assert_eq!(envelope.error.as_deref(), Some("Invalid source: slack"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        // The rejected frame must not have reached the history.
        assert!(relay.get_history("conn-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_frame_returns_the_recorded_exchange() {
        let relay = test_relay();
        handle_frame(
            &relay,
            "conn-1",
            r#"{"type":"chat","source":"vscode","content":"Hi"}"#
        ).await;
        let reply = handle_frame(&relay, "conn-1", r#"{"type":"history"}"#).await;

        match reply {
            ServerMessage::History { chat_id, messages } => {
                assert_eq!(chat_id, "conn-1");
                assert_eq!(messages.len(), 2);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frame_answers_with_an_error() {
        let relay = test_relay();
        let reply = handle_frame(&relay, "conn-1", "not json").await;
        match reply {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Failed to parse message"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
