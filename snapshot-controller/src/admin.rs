use futures::future;
use hyper::{Body, Request, Response};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};

#[instrument(skip(ready, registry))]
pub async fn serve(
    addr: SocketAddr,
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let ready = ready.clone();
            let registry = registry.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| match req.uri().path() {
                    "/ready" => future::ok(handle_ready(&ready, req)),
                    "/metrics" => future::ok(handle_metrics(&registry, req)),
                    _ => future::ok::<_, hyper::Error>(
                        Response::builder()
                            .status(hyper::StatusCode::NOT_FOUND)
                            .body(Body::default())
                            .unwrap(),
                    ),
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "HTTP admin server listening");
    server.await
}

fn handle_ready(ready: &watch::Receiver<bool>, req: Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            if *ready.borrow() {
                Response::builder()
                    .status(hyper::StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("ready\n".into())
                    .unwrap()
            } else {
                Response::builder()
                    .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("not ready\n".into())
                    .unwrap()
            }
        }
        _ => Response::builder()
            .status(hyper::StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}

fn handle_metrics(registry: &Registry, req: Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET => {
            let mut buffer = String::new();
            match prometheus_client::encoding::text::encode(&mut buffer, registry) {
                Ok(()) => Response::builder()
                    .status(hyper::StatusCode::OK)
                    .header(
                        hyper::header::CONTENT_TYPE,
                        "application/openmetrics-text; version=1.0.0; charset=utf-8",
                    )
                    .body(buffer.into())
                    .unwrap(),
                Err(error) => {
                    tracing::error!(%error, "failed to encode metrics");
                    Response::builder()
                        .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Body::default())
                        .unwrap()
                }
            }
        }
        _ => Response::builder()
            .status(hyper::StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}
