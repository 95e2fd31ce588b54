//! Prometheus scrape endpoint

use fleet_engine::FleetMetrics;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serve `/metrics` and `/healthz` until cancelled
pub async fn serve(
    addr: SocketAddr,
    metrics: FleetMetrics,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handle(&req, &metrics);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

fn handle<B>(req: &Request<B>, metrics: &FleetMetrics) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "OK\n"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = FleetMetrics::new().unwrap();
        metrics.record_reconcile("ServerSet", true, Duration::from_millis(40));

        let req = Request::get("/metrics").body(()).unwrap();
        let response = handle(&req, &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        assert!(body(response).await.contains("fleet_reconcile_total"));
    }

    #[tokio::test]
    async fn test_health_and_unknown_paths() {
        let metrics = FleetMetrics::new().unwrap();

        let health = handle(&Request::get("/healthz").body(()).unwrap(), &metrics);
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(body(health).await, "OK\n");

        let missing = handle(&Request::get("/routes").body(()).unwrap(), &metrics);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let post = handle(&Request::post("/metrics").body(()).unwrap(), &metrics);
        assert_eq!(post.status(), StatusCode::NOT_FOUND);
    }
}
