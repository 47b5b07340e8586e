//! Smart HTTP front end: `GET /info/refs` and `POST /git-upload-pack` on an explicit router.
//!
//! Responses are buffered so a failure anywhere in the exchange still turns into a clean 500.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::ServerError;
use crate::protocol::{
    Endpoint, ProtocolError, ServiceType, TransportProtocol, UploadPack, UploadPackProvider,
};

pub const ADVERTISEMENT_CONTENT_TYPE: &str = "application/x-git-upload-pack-advertisement";
pub const RESULT_CONTENT_TYPE: &str = "application/x-git-upload-pack-result";

/// Read-only state shared by both handlers.
#[derive(Clone)]
pub struct HttpState<P: UploadPackProvider> {
    pub endpoint: Endpoint,
    pub provider: P,
}

impl<P: UploadPackProvider> HttpState<P> {
    pub fn new(endpoint: Endpoint, provider: P) -> Self {
        Self { endpoint, provider }
    }

    fn upload_pack(&self) -> UploadPack<P> {
        UploadPack::new(
            self.provider.clone(),
            self.endpoint.clone(),
            TransportProtocol::Http,
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoRefsParams {
    service: Option<String>,
}

/// Routes match the Git smart HTTP endpoints for a single repository.
pub fn router<P: UploadPackProvider>(state: HttpState<P>) -> Router {
    Router::new()
        .route("/info/refs", get(info_refs::<P>))
        .route("/git-upload-pack", post(upload_pack::<P>))
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve the router until the listener fails.
pub async fn run_http<P: UploadPackProvider>(
    addr: SocketAddr,
    state: HttpState<P>,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            transport: "http",
            addr,
            source,
        })?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    tracing::info!(addr = %local_addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|source| ServerError::Serve {
            transport: "http",
            source,
        })
}

async fn info_refs<P: UploadPackProvider>(
    State(state): State<Arc<HttpState<P>>>,
    Query(params): Query<InfoRefsParams>,
) -> Response {
    // Push is never served; only the upload-pack advertisement exists.
    if let Some(service) = params.service.as_deref()
        && service.parse::<ServiceType>().ok() != Some(ServiceType::UploadPack)
    {
        return error_response(ProtocolError::invalid_service(service));
    }

    let mut body = Vec::new();
    match state.upload_pack().info_refs(&mut body).await {
        Ok(()) => (
            [
                (header::CONTENT_TYPE, ADVERTISEMENT_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            body,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_pack<P: UploadPackProvider>(
    State(state): State<Arc<HttpState<P>>>,
    body: Bytes,
) -> Response {
    let mut reader = &body[..];
    let mut out = Vec::new();
    match state.upload_pack().exchange(&mut reader, &mut out).await {
        Ok(()) => (
            [
                (header::CONTENT_TYPE, RESULT_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            out,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: ProtocolError) -> Response {
    tracing::error!(error = %err, "HTTP upload-pack request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
