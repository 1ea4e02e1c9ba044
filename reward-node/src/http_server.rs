use crate::metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    node: &'a str,
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn with_content_type<R: std::io::Read>(resp: Response<R>, value: &str) -> Response<R> {
    match header("Content-Type", value) {
        Some(h) => resp.with_header(h),
        None => resp,
    }
}

/// Serve `/healthz` and `/metrics` until `stop` is set.
pub fn serve(
    bind: &str,
    node_label: &str,
    metrics_enabled: bool,
    stop: Arc<AtomicBool>,
) -> Result<(), String> {
    let server =
        Server::http(bind).map_err(|e| format!("failed to bind http server on {bind}: {e}"))?;
    info!(bind, "reward-node http server started");

    while !stop.load(Ordering::Relaxed) {
        let req = match server.recv_timeout(Duration::from_millis(500)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "http server receive failed");
                continue;
            }
        };
        let url = req.url().to_string();
        let path = url.split_once('?').map(|(p, _)| p).unwrap_or(&url);
        let method = req.method().as_str().to_string();

        let resp = match (method.as_str(), path) {
            ("GET", "/healthz") => {
                let body = serde_json::to_string(&HealthResponse {
                    status: "ok",
                    node: node_label,
                })
                .unwrap_or_else(|_| "{\"status\":\"ok\"}".to_string());
                with_content_type(
                    Response::from_string(body).with_status_code(200),
                    "application/json",
                )
            }
            ("GET", "/metrics") if metrics_enabled => with_content_type(
                Response::from_string(metrics::gather_text()).with_status_code(200),
                "text/plain; version=0.0.4",
            ),
            ("GET", "/metrics") => {
                Response::from_string("metrics disabled\n").with_status_code(404)
            }
            _ => Response::from_string("not found\n").with_status_code(404),
        };
        if let Err(e) = req.respond(resp) {
            warn!(error = %e, "failed to write http response");
        }
    }
    info!("reward-node http server stopped");
    Ok(())
}
