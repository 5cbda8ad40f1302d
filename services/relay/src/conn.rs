// TCP accept loop and per-connection frame processing.
//
// Each connection gets one read task (the only code touching its frame
// buffer) and one writer task (the only code touching the socket write
// half). Broadcasts and direct responses are enqueued onto the writer's
// channel; a send that fails means the connection already closed.
use anyhow::Result;
use bytes::Bytes;
use hub_broker::{ConnectionId, Hub};
use hub_wire::{Append, FrameBuffer, GREETING};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::accounts::AccountClient;
use crate::config::HubConfig;
use crate::dispatch;

// Outbound queue depth per connection; broadcasts drop their copy when full.
const OUTBOUND_QUEUE_DEPTH: usize = 256;
// Read chunk size for the socket read loop.
const READ_CHUNK_BYTES: usize = 4096;

pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    accounts: Option<Arc<AccountClient>>,
    config: HubConfig,
) -> Result<()> {
    // Main accept loop: spawn a task per incoming TCP connection.
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        let accounts = accounts.clone();
        let buffer_bytes = config.buffer_bytes;
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer_addr, hub, accounts, buffer_bytes).await
            {
                tracing::warn!(error = %err, "connection handler failed");
            }
        });
    }
}

struct ConnState {
    id: ConnectionId,
    channel: Option<String>,
    buffer: FrameBuffer,
    outbound: mpsc::Sender<Bytes>,
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<Hub>,
    accounts: Option<Arc<AccountClient>>,
    buffer_bytes: usize,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let buffer = FrameBuffer::new(buffer_bytes)?;
    let conn_id = ConnectionId::new();
    tracing::info!(conn = %conn_id, peer = %peer_addr, "new client");
    metrics::gauge!("hub_connections_active").increment(1.0);

    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_DEPTH);
    tokio::spawn(run_writer_loop(write_half, outbound_rx));

    let mut state = ConnState {
        id: conn_id,
        channel: None,
        buffer,
        outbound: outbound_tx,
    };

    read_loop(read_half, &mut state, &hub, &accounts).await;

    // Close event: the registry entry goes away even on abrupt disconnect.
    if let Some(channel) = state.channel.take() {
        hub.deregister(&channel, conn_id);
        tracing::info!(conn = %conn_id, channel = %channel, "client disconnected from channel");
    } else {
        tracing::info!(conn = %conn_id, "client disconnected");
    }
    metrics::gauge!("hub_connections_active").decrement(1.0);
    Ok(())
}

// Writer loop owns the socket write half and serializes all outbound bytes.
// It ends when the last sender drops or the first write fails; pending
// deferred responses are dropped with it.
async fn run_writer_loop(mut write_half: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Bytes>) {
    while let Some(payload) = outbound_rx.recv().await {
        if let Err(err) = write_half.write_all(&payload).await {
            tracing::info!(error = %err, "outbound stream closed");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    state: &mut ConnState,
    hub: &Arc<Hub>,
    accounts: &Option<Arc<AccountClient>>,
) {
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(err) => {
                // Transport errors are close events, not faults.
                tracing::info!(conn = %state.id, error = %err, "read failed; closing connection");
                return;
            }
        };
        process_chunk(state, hub, accounts, &chunk[..n]).await;
    }
}

// One pass per inbound chunk: append, then a single subscribe scan, then
// drain complete JSON frames until only a partial tail (or nothing) is left.
async fn process_chunk(
    state: &mut ConnState,
    hub: &Arc<Hub>,
    accounts: &Option<Arc<AccountClient>>,
    chunk: &[u8],
) {
    if let Append::Overflow = state.buffer.append(chunk) {
        metrics::counter!("hub_buffer_overflow_total").increment(1);
        tracing::warn!(
            conn = %state.id,
            chunk_bytes = chunk.len(),
            capacity = state.buffer.capacity(),
            "chunk does not fit the buffer; buffered bytes dropped"
        );
        return;
    }

    if let Some(frame) = state.buffer.text().and_then(hub_wire::subscribe_frame) {
        let consumed = frame.consumed;
        apply_subscribe(state, hub, frame.channel).await;
        state.buffer.consume(consumed);
    }

    loop {
        let Some(frame) = state.buffer.text().and_then(hub_wire::json_frame) else {
            break;
        };
        let consumed = frame.consumed;
        handle_json(state, hub, accounts, frame.payload).await;
        state.buffer.consume(consumed);
    }
}

async fn apply_subscribe(state: &mut ConnState, hub: &Arc<Hub>, channel: String) {
    match hub.register(&channel, state.id, state.outbound.clone()) {
        Ok(()) => {
            // A later subscribe moves the connection between channels.
            if let Some(previous) = state.channel.take()
                && previous != channel
            {
                hub.deregister(&previous, state.id);
            }
            metrics::counter!("hub_frames_total", "kind" => "subscribe").increment(1);
            tracing::info!(conn = %state.id, channel = %channel, "client subscribed");
            state.channel = Some(channel);
            let _ = state
                .outbound
                .send(Bytes::from_static(GREETING.as_bytes()))
                .await;
        }
        Err(err) => {
            tracing::warn!(conn = %state.id, error = %err, "subscribe rejected");
        }
    }
}

async fn handle_json(
    state: &mut ConnState,
    hub: &Arc<Hub>,
    accounts: &Option<Arc<AccountClient>>,
    payload: String,
) {
    metrics::counter!("hub_frames_total", "kind" => "json").increment(1);
    let parsed: serde_json::Value = match serde_json::from_str(&payload) {
        Ok(value) => value,
        Err(err) => {
            // The failing frame is dropped; scanning continues with the rest.
            metrics::counter!("hub_json_malformed_total").increment(1);
            tracing::warn!(conn = %state.id, error = %err, "malformed json payload dropped");
            return;
        }
    };
    tracing::debug!(conn = %state.id, payload = %payload, "client posts json");

    dispatch::dispatch(state.id, state.outbound.clone(), accounts.clone(), &parsed);

    // Every valid frame is broadcast, recognized action or not. A
    // connection that never subscribed broadcasts to nobody.
    let Some(channel) = state.channel.as_deref() else {
        return;
    };
    hub.broadcast(channel, Bytes::from(hub_wire::wrap_json(&payload)));
}
