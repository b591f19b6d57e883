//! Inbound message pipeline: decode, reserved-name check, middleware, dispatch.

mod dispatch;
mod middleware;

pub use dispatch::EventTable;
pub use middleware::MiddlewareChain;

use std::sync::Arc;

use metrics::counter;
use roomcast_core::{DispatchError, EventMessage, SessionId, is_reserved_event};
use tracing::{debug, warn};

use crate::hub::Hub;
use crate::metrics as names;
use crate::websocket::session::Session;

/// What application handlers return.
pub type HandlerResult = anyhow::Result<()>;

/// What happened to one inbound text frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    /// A handler ran and returned `Ok`.
    Handled,
    /// The frame decoded but no handler is registered for its event.
    Unhandled,
    /// The frame is not an `{event, data}` record.
    Malformed,
    /// A peer tried to send a lifecycle event.
    Reserved,
    /// A middleware refused the message.
    Blocked,
    /// Payload decode or the handler itself failed.
    Failed,
}

/// Run one inbound frame through the pipeline.
///
/// Every failure is contained here; the caller keeps reading.
pub fn route(hub: &Hub, session: &Arc<Session>, text: &str) -> Routed {
    counter!(names::EVENTS_RECEIVED_TOTAL).increment(1);

    let message = match EventMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            record_failure(session.id(), &DispatchError::MalformedFrame(e));
            return Routed::Malformed;
        }
    };

    if is_reserved_event(&message.event) && !hub.allow_reserved_events() {
        warn!(session_id = %session.id(), event = %message.event, "peer sent reserved event, dropping");
        counter!(names::EVENTS_BLOCKED_TOTAL, "reason" => "reserved").increment(1);
        return Routed::Reserved;
    }

    if let Some(index) = hub.middleware().blocked_by(session, &message) {
        debug!(session_id = %session.id(), event = %message.event, middleware = index, "blocked by middleware");
        counter!(names::EVENTS_BLOCKED_TOTAL, "reason" => "middleware").increment(1);
        return Routed::Blocked;
    }

    let EventMessage { event, data } = message;
    match hub.events().dispatch(session, &event, data) {
        Ok(true) => Routed::Handled,
        Ok(false) => {
            debug!(session_id = %session.id(), event = %event, "no handler registered");
            Routed::Unhandled
        }
        Err(e) => {
            record_failure(session.id(), &e);
            Routed::Failed
        }
    }
}

/// Log and count a per-message failure.
pub(crate) fn record_failure(session_id: &SessionId, err: &DispatchError) {
    match err {
        DispatchError::MalformedFrame(_) | DispatchError::Decode { .. } => {
            counter!(names::DECODE_FAILURES_TOTAL, "kind" => err.kind()).increment(1);
        }
        DispatchError::Handler { event, .. } => {
            counter!(names::HANDLER_ERRORS_TOTAL, "event" => event.clone()).increment(1);
        }
    }
    warn!(%session_id, kind = err.kind(), error = %err, "event dropped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hub::{Hub, HubOptions};
    use roomcast_core::CONNECT_EVENT;
    use serde::Deserialize;
    use serde_json::json;

    fn hub(allow_reserved_events: bool) -> Hub {
        let (hub, _runner) = Hub::new(HubOptions {
            queue_capacity: 8,
            allow_reserved_events,
        });
        hub
    }

    fn counting(hub: &Hub, event: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        hub.events().on(event, move |_s, _d| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hits
    }

    #[test]
    fn well_formed_frame_is_handled() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        let hits = counting(&hub, "test");
        assert_eq!(route(&hub, &session, r#"{"event":"test","data":{"x":1}}"#), Routed::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        assert_eq!(route(&hub, &session, "not json"), Routed::Malformed);
        assert_eq!(route(&hub, &session, r#"{"data":1}"#), Routed::Malformed);
    }

    #[test]
    fn unknown_event_is_unhandled() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        assert_eq!(route(&hub, &session, r#"{"event":"nobody"}"#), Routed::Unhandled);
    }

    #[test]
    fn reserved_event_from_peer_is_refused() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        let hits = counting(&hub, CONNECT_EVENT);
        assert_eq!(route(&hub, &session, r#"{"event":"connect"}"#), Routed::Reserved);
        assert_eq!(route(&hub, &session, r#"{"event":"disconnect"}"#), Routed::Reserved);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reserved_event_allowed_when_configured() {
        let hub = hub(true);
        let (session, _rx) = hub.create_session();
        let hits = counting(&hub, CONNECT_EVENT);
        assert_eq!(route(&hub, &session, r#"{"event":"connect"}"#), Routed::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn middleware_block_skips_handler() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        let hits = counting(&hub, "forbidden");
        hub.middleware().push(|_s, m| m.event != "forbidden");

        assert_eq!(route(&hub, &session, r#"{"event":"forbidden"}"#), Routed::Blocked);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn middleware_sees_decoded_message() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);
        hub.middleware().push(move |s, m| {
            *sink.lock() = Some((s.id().clone(), m.clone()));
            true
        });

        let _ = route(&hub, &session, r#"{"event":"x","data":[1]}"#);
        let (id, message) = seen.lock().clone().unwrap();
        assert_eq!(&id, session.id());
        assert_eq!(message, EventMessage::new("x", json!([1])));
    }

    #[test]
    fn decode_failure_then_valid_message() {
        #[derive(Deserialize)]
        struct Join {
            room: String,
        }

        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        hub.admit_for_test(&session);
        hub.events().on_typed("join", |s, req: Join| {
            let _ = s.join(&req.room);
            Ok(())
        });

        assert_eq!(route(&hub, &session, r#"{"event":"join","data":{"room":7}}"#), Routed::Failed);
        assert!(session.rooms().is_empty());
        assert_eq!(route(&hub, &session, r#"{"event":"join","data":{"room":"a"}}"#), Routed::Handled);
        assert_eq!(session.rooms(), vec!["a".to_string()]);
    }

    #[test]
    fn handler_error_is_contained() {
        let hub = hub(false);
        let (session, _rx) = hub.create_session();
        hub.events().on("boom", |_s, _d| Err(anyhow::anyhow!("exploded")));
        assert_eq!(route(&hub, &session, r#"{"event":"boom"}"#), Routed::Failed);
        assert_eq!(route(&hub, &session, r#"{"event":"boom"}"#), Routed::Failed);
    }
}
