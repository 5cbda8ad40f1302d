//! Observability setup for the relay service: tracing subscriber plus a
//! Prometheus metrics recorder with an HTTP endpoint for `/metrics`,
//! `/live` and `/ready`. In tests the recorder handle is cached so repeated
//! initialization does not conflict.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
#[cfg(test)]
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes tracing and metrics for the service.
///
/// `RUST_LOG` wins when set; otherwise the verbose toggle picks between the
/// `debug` and `info` default filters. Returns a `PrometheusHandle` for
/// serving metrics.
pub fn init_observability(verbose: bool) -> PrometheusHandle {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer();
    init_subscriber(tracing_subscriber::registry().with(filter).with(fmt_layer));

    install_metrics_recorder()
}

/// Serves Prometheus metrics and health endpoints on the given address.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/live", axum::routing::get(|| async { "ok" }))
        .route("/ready", axum::routing::get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}

fn install_metrics_recorder() -> PrometheusHandle {
    #[cfg(test)]
    {
        if let Some(handle) = METRICS_HANDLE.get() {
            return handle.clone();
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("install metrics recorder");
        let _ = METRICS_HANDLE.set(handle.clone());
        handle
    }
    #[cfg(not(test))]
    {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install metrics recorder")
    }
}

fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    #[cfg(test)]
    {
        let _ = subscriber.try_init();
    }
    #[cfg(not(test))]
    {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn init_observability_returns_a_usable_handle() {
        let handle = init_observability(false);
        let _ = handle.render();
        // Repeated initialization reuses the cached recorder.
        let handle = init_observability(true);
        let _ = handle.render();
    }

    #[tokio::test]
    #[serial]
    async fn metrics_endpoints_respond() {
        let handle = init_observability(false);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/metrics",
                    axum::routing::get(move || async move { handle.render() }),
                )
                .route("/live", axum::routing::get(|| async { "ok" }))
                .route("/ready", axum::routing::get(|| async { "ok" }));
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        let response = reqwest::get(format!("http://{addr}/live"))
            .await
            .expect("live");
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.expect("body"), "ok");

        let response = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .expect("metrics");
        assert_eq!(response.status(), 200);
    }
}
