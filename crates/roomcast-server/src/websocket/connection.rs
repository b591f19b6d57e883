//! Session lifecycle for one upgraded socket, from registration to close.
//!
//! Each connection runs two loops. The outbound loop drains the session's
//! queue into the socket and sends a Close frame once the queue is closed.
//! The inbound loop reads frames and routes them until the peer goes away,
//! the transport fails, or the session is closed by the hub. Both loops
//! watch the session's close token, so a shed session stops even when its
//! peer has stopped reading and the writer is stuck mid-send.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use roomcast_core::{EventMessage, HubError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::session::Session;
use crate::events::route;
use crate::hub::Hub;

/// How long the writer gets to flush and send Close after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Admit an upgraded socket and run it until it closes.
#[instrument(skip_all)]
pub(crate) async fn serve_socket(socket: WebSocket, hub: Hub) {
    let (session, outbound) = hub.create_session();
    if let Err(err) = hub.register(Arc::clone(&session)).await {
        warn!(error = %err, "could not admit session");
        return;
    }
    run_session(socket, session, outbound, hub).await;
}

/// Drive both loops for a registered session, then deregister it.
#[instrument(skip_all, fields(session_id = %session.id()))]
async fn run_session(
    socket: WebSocket,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Arc<EventMessage>>,
    hub: Hub,
) {
    let (sink, stream) = socket.split();
    let closed = session.closed().clone();

    let mut writer = tokio::spawn(
        outbound_loop(sink, outbound, closed.clone()).instrument(tracing::Span::current()),
    );

    inbound_loop(stream, &session, &hub, closed).await;
    hub.deregister(Arc::clone(&session));

    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!("outbound loop did not finish in time, aborting");
        writer.abort();
    }
    info!(
        dropped = session.dropped_messages(),
        connected_secs = session.connected_for().as_secs(),
        "connection closed"
    );
}

/// Write `frame` unless `closed` fires while the write is pending.
///
/// Returns `None` when the write was abandoned.
async fn write_frame<W>(
    sink: &mut W,
    frame: Message,
    closed: &CancellationToken,
) -> Option<Result<(), W::Error>>
where
    W: Sink<Message> + Unpin,
{
    tokio::select! {
        biased;
        result = sink.send(frame) => Some(result),
        () = closed.cancelled() => None,
    }
}

/// Write queued messages in order. Stops on the first write error.
///
/// When the queue closes (deregistration or shedding) a Close frame is
/// sent. A write still pending once `closed` is cancelled is abandoned.
pub(crate) async fn outbound_loop<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Arc<EventMessage>>,
    closed: CancellationToken,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(message) = queue.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(event = %message.event, error = %e, "failed to encode outbound message");
                continue;
            }
        };
        match write_frame(&mut sink, Message::Text(text.into()), &closed).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                let err = HubError::Transport(e.to_string());
                debug!(error = %err, "write failed, stopping outbound loop");
                return;
            }
            None => {
                debug!("session closed while peer was not reading, dropping writer");
                return;
            }
        }
    }

    debug!("outbound queue closed, sending close frame");
    let _ = write_frame(&mut sink, Message::Close(None), &closed).await;
}

/// Read frames and route each text payload until the connection ends or
/// `closed` is cancelled.
pub(crate) async fn inbound_loop<R, E>(
    mut stream: R,
    session: &Arc<Session>,
    hub: &Hub,
    closed: CancellationToken,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => {
                debug!("session closed by server");
                break;
            }
            frame = stream.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                let err = HubError::Transport(e.to_string());
                info!(error = %err, "read failed");
                break;
            }
            None => {
                debug!("stream ended");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    info!(len = data.len(), "dropping non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("peer sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let _ = route(hub, session, &text);
    }
}
