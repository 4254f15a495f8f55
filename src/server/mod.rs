//! HTTP listener for trading signals.
//!
//! tiny_http accepts connections on a blocking thread; each request is
//! handed to a tokio task so signals execute concurrently.

pub mod intake;

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::Exchange;

pub use intake::{SignalIntake, WebhookResponse};

const WEBHOOK_PATH: &str = "/webhook";

/// Running webhook server.
pub struct WebhookServer {
    server: Arc<Server>,
    local_addr: Option<SocketAddr>,
    accept_loop: JoinHandle<()>,
}

impl WebhookServer {
    /// Bind `addr` and start accepting requests on the current runtime.
    pub fn start<E: Exchange>(addr: &str, intake: Arc<SignalIntake<E>>) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
        let server = Arc::new(server);
        let local_addr = server.server_addr().to_ip();
        info!(addr = ?local_addr, path = WEBHOOK_PATH, "Webhook server listening");

        let runtime = Handle::current();
        let accept_loop = {
            let server = server.clone();
            tokio::task::spawn_blocking(move || accept_requests(&server, &runtime, intake))
        };

        Ok(Self {
            server,
            local_addr,
            accept_loop,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting requests. In-flight executions keep running.
    pub async fn shutdown(self) {
        self.server.unblock();
        if let Err(e) = self.accept_loop.await {
            warn!(error = %e, "Webhook accept loop ended abnormally");
        }
        info!("Webhook server stopped");
    }
}

fn accept_requests<E: Exchange>(server: &Server, runtime: &Handle, intake: Arc<SignalIntake<E>>) {
    for mut request in server.incoming_requests() {
        let path = request.url().split('?').next().unwrap_or_default().to_string();
        debug!(method = %request.method(), path = %path, "Incoming request");

        if *request.method() != Method::Post || path != WEBHOOK_PATH {
            let body = WebhookResponse::error("Not found");
            respond(request, 404, &body);
            continue;
        }

        let mut body = String::new();
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            warn!(error = %e, "Failed to read request body");
            respond(request, 400, &WebhookResponse::error("Unreadable request body"));
            continue;
        }

        let intake = intake.clone();
        runtime.spawn(async move {
            let reply = intake.handle(&body).await;
            let responded = tokio::task::spawn_blocking(move || {
                respond(request, reply.status_code, &reply.body);
            })
            .await;
            if let Err(e) = responded {
                warn!(error = %e, "Failed to send webhook response");
            }
        });
    }
}

fn respond(request: Request, status_code: u16, body: &WebhookResponse) {
    let text = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    if let Err(e) = request.respond(json_response(status_code, text)) {
        warn!(error = %e, "Failed to write response");
    }
}

fn json_response(status_code: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_data(body.into_bytes()).with_status_code(status_code);
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}
