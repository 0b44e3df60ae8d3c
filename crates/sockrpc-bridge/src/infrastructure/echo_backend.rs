//! A small demonstration backend.
//!
//! [`EchoBackend`] admits sessions that present the configured bearer token
//! (or every session when no token is configured).  Admitted sessions answer
//! `GET /ping` with `pong` and echo any other request back as JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use sockrpc_core::{
    Admission, Backend, BackendResponse, Connection, ConnectionRequest, IncomingRequest,
};

/// Admits sessions by bearer token.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    auth_token: Option<String>,
}

impl EchoBackend {
    pub fn new(auth_token: Option<String>) -> Self {
        Self { auth_token }
    }

    fn is_authorized(&self, request: &ConnectionRequest) -> bool {
        let Some(token) = &self.auth_token else {
            return true;
        };
        request
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == token)
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn new_connection(&self, request: ConnectionRequest) -> Admission {
        if self.is_authorized(&request) {
            debug!("echo backend: admitting {}", request.remote_addr);
            Admission::Admitted(Arc::new(EchoConnection::new(request.remote_addr)))
        } else {
            Admission::Rejected(BackendResponse::new(401, "unauthorized"))
        }
    }
}

/// One admitted echo session.
#[derive(Debug)]
pub struct EchoConnection {
    remote_addr: String,
}

impl EchoConnection {
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
        }
    }
}

#[derive(Serialize)]
struct Echo<'a> {
    method: &'a str,
    path: &'a str,
    payload: &'a str,
}

#[async_trait]
impl Connection for EchoConnection {
    async fn handle(&self, mut request: IncomingRequest) -> BackendResponse {
        if request.method == "GET" && request.request_uri == "/ping" {
            return BackendResponse::new(200, "pong");
        }

        let payload = match request.read_payload_to_string() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("echo {}: unreadable request body: {e}", self.remote_addr);
                return BackendResponse::new(400, "unreadable body");
            }
        };

        let echo = Echo {
            method: &request.method,
            path: &request.request_uri,
            payload: &payload,
        };
        match serde_json::to_string(&echo) {
            Ok(json) => BackendResponse::new(200, json),
            Err(e) => {
                warn!("echo {}: failed to encode echo: {e}", self.remote_addr);
                BackendResponse::new(500, "internal error")
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
