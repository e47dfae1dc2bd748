use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::identity::User;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::session::Session;
use crate::ws::{ConnectionSender, OUTBOUND_CAPACITY};

/// Server ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a ping may go unanswered before the connection is closed.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on flushing queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Close code for a peer that stopped answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Drive one authenticated connection until it closes.
///
/// The socket sink is owned by a writer task fed through an mpsc channel;
/// every other producer (room fan-out, presence, acks) holds a clone of the
/// sender. Client frames are handled one at a time on this task, so a
/// connection's requests never interleave with each other.
pub async fn run_connection(socket: WebSocket, state: AppState, user: User) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = ConnectionSender::channel(OUTBOUND_CAPACITY);

    // The writer must be running before registration queues presence frames
    let mut writer = tokio::spawn(writer_task(sink, rx));
    let mut session = Session::open(&state, user, tx.clone());
    let (connection_id, user_id) = (session.id, session.user.id.clone());

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        sector = %session.user.sector,
        "WebSocket actor started"
    );

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let keepalive = tokio::spawn(keepalive_task(tx.clone(), pong_rx));

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = tx.overflowed() => {
                tracing::warn!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    capacity = OUTBOUND_CAPACITY,
                    "Outbound queue full, dropping slow connection"
                );
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };
        match frame {
            Ok(Message::Text(text)) => {
                protocol::handle_text_message(text.as_str(), &mut session, &state).await;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    bytes = data.len(),
                    "Ignoring binary frame"
                );
            }
            Ok(Message::Ping(data)) => {
                tx.send(Message::Pong(data));
            }
            Ok(Message::Pong(_)) => {
                let _ = pong_tx.send(());
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    reason = ?frame,
                    "Client initiated close"
                );
                break;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
        }
    }

    keepalive.abort();
    session.close(&state);

    // With every sender gone the writer flushes what is queued and exits
    drop(tx);
    if timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Writer did not drain in time");
        writer.abort();
    }

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket actor stopped"
    );
}

/// Ping the client periodically; ask the writer to close the socket when a
/// pong does not arrive in time.
async fn keepalive_task(tx: ConnectionSender, mut pong_rx: mpsc::UnboundedReceiver<()>) {
    let mut ticker = interval(PING_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !tx.send(Message::Ping(vec![1, 2, 3, 4].into())) {
            return;
        }

        if let Ok(Some(())) = timeout(PONG_TIMEOUT, pong_rx.recv()).await {
            continue;
        }
        tracing::warn!("Pong timeout, closing connection");
        tx.send(Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "Pong timeout".into(),
        })));
        return;
    }
}

/// Forward queued frames to the socket until the channel closes or a send fails.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}
