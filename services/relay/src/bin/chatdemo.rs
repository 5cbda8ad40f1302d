// Console demo that exercises subscribe + fan-out over the sentinel protocol.
use anyhow::{Context, Result};
use hub_broker::Hub;
use relay::config::HubConfig;
use relay::conn;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the demo output readable and step-by-step.
    println!("== Relay Hub Demo ==");
    println!("Goal: demonstrate channel subscribe + JSON fan-out over raw TCP.");

    println!("Step 1/5: booting an in-process relay.");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind listener")?;
    let addr = listener.local_addr()?;
    let hub = Arc::new(Hub::new());
    let config = HubConfig {
        bind: addr,
        metrics_bind: "127.0.0.1:0".parse()?,
        buffer_bytes: 8 * 1024,
        verbose: false,
        accounts_url: None,
        accounts_timeout_ms: 2000,
    };
    tokio::spawn(conn::serve(listener, Arc::clone(&hub), None, config));

    println!("Step 2/5: connecting two clients and subscribing to `demo`.");
    let mut alice = TcpStream::connect(addr).await?;
    let mut bob = TcpStream::connect(addr).await?;
    subscribe(&mut alice, "demo").await?;
    subscribe(&mut bob, "demo").await?;

    println!("Step 3/5: alice posts a JSON frame.");
    let wire = hub_wire::wrap_json(r#"{"action":"chat","from":"alice","text":"hello"}"#);
    alice.write_all(wire.as_bytes()).await?;

    println!("Step 4/5: both clients receive the broadcast.");
    println!("alice got: {}", read_frame(&mut alice).await?);
    println!("bob   got: {}", read_frame(&mut bob).await?);

    println!("Step 5/5: done.");
    Ok(())
}

async fn subscribe(stream: &mut TcpStream, channel: &str) -> Result<()> {
    stream
        .write_all(format!("__SUBSCRIBE__{channel}__ENDSUBSCRIBE__").as_bytes())
        .await?;
    let mut greeting = vec![0u8; hub_wire::GREETING.len()];
    stream.read_exact(&mut greeting).await?;
    print!("server says: {}", String::from_utf8_lossy(&greeting));
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<String> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .context("wait for frame")??;
        anyhow::ensure!(n > 0, "connection closed before a frame arrived");
        collected.extend_from_slice(&chunk[..n]);
        if let Ok(text) = std::str::from_utf8(&collected)
            && let Some(frame) = hub_wire::json_frame(text)
        {
            return Ok(frame.payload);
        }
    }
}
