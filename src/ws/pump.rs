//! Reader and writer pumps for one upgraded socket
//!
//! The reader hands every text frame to the router and unregisters the
//! connection when the peer goes away. The writer drains the outbound queue,
//! keeps the peer alive with pings and sends a Close frame once the queue is
//! closed by the hub.

use crate::hub::Connection;
use crate::router::EventRouter;
use crate::ws::WsSettings;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::Level;

/// Transport-level failure ending a pump
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("Write deadline exceeded")]
    WriteTimeout,

    #[error("Read deadline exceeded")]
    ReadTimeout,

    #[error("WebSocket error: {0}")]
    Socket(#[from] axum::Error),
}

/// Drive a registered socket until either side gives up
pub async fn run_connection(
    socket: WebSocket,
    conn: Arc<Connection>,
    outbound: mpsc::Receiver<Bytes>,
    router: Arc<EventRouter>,
    settings: WsSettings,
) {
    let (sink, stream) = socket.split();

    router.hub().register(conn.clone()).await;
    crate::log_ws!(
        Level::INFO,
        conn = %conn.id(),
        user = conn.user_id(),
        session = conn.session_id(),
        "connection registered"
    );

    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        conn.clone(),
        settings.ping_interval,
        settings.write_timeout,
    ));

    if let Err(e) = read_pump(stream, &conn, &router, settings.read_timeout).await {
        crate::log_ws!(Level::DEBUG, conn = %conn.id(), error = %e, "reader stopped");
    }

    router.hub().unregister(conn.clone()).await;
    // Covers the case where the hub loop is gone and never closes the queue
    conn.close();
    let _ = writer.await;
    crate::log_ws!(Level::INFO, conn = %conn.id(), "connection finished");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    conn: &Arc<Connection>,
    router: &EventRouter,
    read_timeout: Duration,
) -> Result<(), PumpError> {
    loop {
        // Every frame, pongs included, restarts the read deadline
        let next = tokio::select! {
            _ = conn.closed() => return Ok(()),
            next = timeout(read_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => return Err(PumpError::ReadTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(result)) => result?,
        };

        match message {
            Message::Text(text) => router.handle_client_frame(conn, text.into_bytes()).await,
            Message::Binary(data) => {
                crate::log_ws!(
                    Level::DEBUG,
                    conn = %conn.id(),
                    bytes = data.len(),
                    "binary frame ignored"
                );
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return Ok(()),
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    conn: Arc<Connection>,
    ping_interval: Duration,
    write_timeout: Duration,
) {
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let result = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => match String::from_utf8(Vec::from(frame)) {
                    Ok(text) => send_frame(&mut sink, Message::Text(text), write_timeout).await,
                    Err(e) => {
                        crate::log_ws!(Level::WARN, conn = %conn.id(), error = %e, "non-UTF-8 frame skipped");
                        Ok(())
                    }
                },
                None => {
                    let _ = send_frame(&mut sink, Message::Close(None), write_timeout).await;
                    return;
                }
            },
            _ = ping.tick() => send_frame(&mut sink, Message::Ping(Vec::new()), write_timeout).await,
        };

        if let Err(e) = result {
            crate::log_ws!(Level::WARN, conn = %conn.id(), error = %e, "write failed");
            // Wakes the reader, which unregisters
            conn.close();
            return;
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    wait: Duration,
) -> Result<(), PumpError> {
    match timeout(wait, sink.send(message)).await {
        Ok(result) => result.map_err(PumpError::from),
        Err(_) => Err(PumpError::WriteTimeout),
    }
}
