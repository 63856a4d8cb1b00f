use crate::cli::Args;
use crate::models::relay::{ ChatRequest, Envelope, HistoryQuery, HistoryResponse, Source };
use crate::relay::{ Relay, DEFAULT_CHAT_ID };

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{ get, post },
    Router,
    extract::{ State, Query },
    response::IntoResponse,
    http::StatusCode,
    Json,
};
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
}

pub async fn start_http_server(
    http_port: u16,
    relay: Arc<Relay>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app_state = AppState { relay };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/history", get(history_handler))
        .layer(cors)
        .with_state(app_state);

    if args.enable_tls && args.tls_cert_path.is_some() && args.tls_key_path.is_some() {
        let cert_path = args.tls_cert_path.as_ref().unwrap();
        let key_path = args.tls_key_path.as_ref().unwrap();

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        error!("HTTP server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                }
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let chat_id = req.chat_id.as_deref().unwrap_or(DEFAULT_CHAT_ID);

    let source = match req.source.parse::<Source>() {
        Ok(source) => source,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(Envelope::failure(chat_id, err.to_string())),
            ).into_response();
        }
    };

    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(Envelope::failure(chat_id, "Empty message")),
        ).into_response();
    }

    let envelope = state.relay
        .send_message(&req.message, req.chat_id.as_deref(), source).await;

    // Provider failures still answer 200; the envelope is the contract.
    (StatusCode::OK, Json(envelope)).into_response()
}

async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state.relay.get_history(&query.chat_id).await {
        Ok(messages) =>
            (
                StatusCode::OK,
                Json(HistoryResponse {
                    chat_id: query.chat_id,
                    messages,
                }),
            ).into_response(),
        Err(e) => {
            error!("History lookup failed for {}: {}", query.chat_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Envelope::failure(query.chat_id, format!("History store error: {}", e))),
            ).into_response()
        }
    }
}
