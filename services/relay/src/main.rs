// Relay service main entry point.
mod observability;

use anyhow::{Context, Result};
use hub_broker::Hub;
use relay::accounts::AccountClient;
use relay::{config, conn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = config::HubConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability(config.verbose);
    // Expose Prometheus metrics on the configured bind address.
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let hub = Arc::new(Hub::new());
    let accounts = match config.accounts_url.clone() {
        Some(base_url) => {
            let timeout = Duration::from_millis(config.accounts_timeout_ms);
            Some(Arc::new(
                AccountClient::new(base_url, timeout).context("build accounts client")?,
            ))
        }
        None => {
            tracing::info!("accounts service disabled (HUB_ACCOUNTS_URL not set)");
            None
        }
    };

    let listener = TcpListener::bind(config.bind)
        .await
        .context("bind TCP listener")?;
    tracing::info!(addr = %listener.local_addr()?, "relay listening");

    // Start accepting connections in a background task.
    let accept_task = {
        let hub = Arc::clone(&hub);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = conn::serve(listener, hub, accounts, config).await {
                tracing::warn!(error = %err, "accept loop exited");
            }
        })
    };

    // Block until the shutdown future resolves so the process stays alive.
    shutdown.await;
    accept_task.abort();
    tracing::info!("relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_without_accounts() -> Result<()> {
        let _g1 = EnvGuard::set("HUB_BIND", "127.0.0.1:0");
        let _g2 = EnvGuard::set("HUB_METRICS_BIND", "127.0.0.1:0");
        let _g3 = EnvGuard::unset("HUB_ACCOUNTS_URL");
        let _g4 = EnvGuard::unset("HUB_CONFIG");
        run_with_shutdown(async {}).await?;
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_with_accounts() -> Result<()> {
        let _g1 = EnvGuard::set("HUB_BIND", "127.0.0.1:0");
        let _g2 = EnvGuard::set("HUB_METRICS_BIND", "127.0.0.1:0");
        let _g3 = EnvGuard::set("HUB_ACCOUNTS_URL", "http://127.0.0.1:1");
        let _g4 = EnvGuard::unset("HUB_CONFIG");
        run_with_shutdown(async {}).await?;
        Ok(())
    }
}
