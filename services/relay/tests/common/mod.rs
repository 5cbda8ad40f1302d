#![allow(dead_code)]
// Shared harness for the relay integration tests: an ephemeral relay
// instance plus a small client speaking the sentinel protocol over TCP.
use anyhow::Result;
use hub_broker::Hub;
use relay::accounts::AccountClient;
use relay::config::HubConfig;
use relay::conn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(300);

pub fn test_config(buffer_bytes: usize) -> HubConfig {
    HubConfig {
        bind: "127.0.0.1:0".parse().expect("addr"),
        metrics_bind: "127.0.0.1:0".parse().expect("addr"),
        buffer_bytes,
        verbose: false,
        accounts_url: None,
        accounts_timeout_ms: 2000,
    }
}

pub async fn start_relay(
    accounts: Option<Arc<AccountClient>>,
    buffer_bytes: usize,
) -> Result<(SocketAddr, Arc<Hub>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hub = Arc::new(Hub::new());
    let serve_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        let _ = conn::serve(listener, serve_hub, accounts, test_config(buffer_bytes)).await;
    });
    Ok((addr, hub))
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buf: Vec::new(),
        })
    }

    /// Connect, subscribe to a channel, and consume the greeting.
    pub async fn subscribe(addr: SocketAddr, channel: &str) -> Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.resubscribe(channel).await?;
        Ok(client)
    }

    pub async fn resubscribe(&mut self, channel: &str) -> Result<()> {
        self.send(format!("__SUBSCRIBE__{channel}__ENDSUBSCRIBE__").as_bytes())
            .await?;
        self.expect_exact(hub_wire::GREETING).await
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Post a payload wrapped in the JSON markers.
    pub async fn post(&mut self, payload: &str) -> Result<()> {
        self.send(hub_wire::wrap_json(payload).as_bytes()).await
    }

    /// Read until the next complete JSON frame arrives; returns its payload.
    pub async fn next_frame(&mut self) -> Result<String> {
        loop {
            if let Ok(text) = std::str::from_utf8(&self.buf)
                && let Some(frame) = hub_wire::json_frame(text)
            {
                self.buf.drain(..frame.consumed);
                return Ok(frame.payload);
            }
            self.read_more().await?;
        }
    }

    /// Read until exactly `expected` has arrived at the front of the stream.
    pub async fn expect_exact(&mut self, expected: &str) -> Result<()> {
        while self.buf.len() < expected.len() {
            self.read_more().await?;
        }
        let head: Vec<u8> = self.buf.drain(..expected.len()).collect();
        anyhow::ensure!(
            head == expected.as_bytes(),
            "expected {expected:?}, got {:?}",
            String::from_utf8_lossy(&head)
        );
        Ok(())
    }

    /// Assert that no further frame arrives within the silence window.
    pub async fn expect_silence(&mut self) -> Result<()> {
        if let Ok(text) = std::str::from_utf8(&self.buf)
            && let Some(frame) = hub_wire::json_frame(text)
        {
            anyhow::bail!("unexpected frame: {}", frame.payload);
        }
        let mut chunk = [0u8; 1024];
        match timeout(SILENCE_TIMEOUT, self.stream.read(&mut chunk)).await {
            Err(_elapsed) => Ok(()),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(n)) => anyhow::bail!(
                "unexpected data: {:?}",
                String::from_utf8_lossy(&chunk[..n])
            ),
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn read_more(&mut self) -> Result<()> {
        let mut chunk = [0u8; 1024];
        let n = timeout(RECV_TIMEOUT, self.stream.read(&mut chunk)).await??;
        anyhow::ensure!(n > 0, "connection closed while waiting for data");
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}
