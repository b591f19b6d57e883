//! Demo handlers wired up by the binary.
//!
//! - `connect`: greet the peer with its id
//! - `join` (typed): join a room and confirm
//! - `leave` (typed): leave a room and confirm
//! - `test`: notify everyone else in room `a`
//! - `disconnect`: log
//! - a middleware that logs every inbound event

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use roomcast_core::{CONNECT_EVENT, DISCONNECT_EVENT};
use roomcast_server::Server;

/// Room the `test` event fans out to.
pub const TEST_ROOM: &str = "a";

/// Payload of `join` and `leave`.
#[derive(Debug, Deserialize)]
pub struct RoomRequest {
    /// Room name.
    pub room: String,
}

/// Register the demo handlers and logging middleware on `server`.
pub fn install(server: &Server) {
    server.use_middleware(|session, message| {
        info!(session_id = %session.id(), event = %message.event, "inbound event");
        true
    });

    server.on(CONNECT_EVENT, |session, _data| {
        info!(session_id = %session.id(), "client connected");
        let _ = session.emit(
            "welcome",
            json!({ "message": "Welcome to the server!", "clientId": session.id() }),
        );
        Ok(())
    });

    server.on(DISCONNECT_EVENT, |session, _data| {
        info!(session_id = %session.id(), "client disconnected");
        Ok(())
    });

    server.on_typed("join", |session, req: RoomRequest| {
        info!(session_id = %session.id(), room = %req.room, "joining room");
        let _ = session.join(&req.room);
        let _ = session.emit(
            "joined",
            json!({ "message": "You have joined the room!", "room": req.room }),
        );
        Ok(())
    });

    server.on_typed("leave", |session, req: RoomRequest| {
        let _ = session.leave(&req.room);
        let _ = session.emit("left", json!({ "room": req.room }));
        Ok(())
    });

    server.on("test", |session, data| {
        info!(session_id = %session.id(), %data, "test event");
        let _ = session.broadcast_to_room(
            TEST_ROOM,
            "test_response",
            json!({
                "message": "Test event received successfully!",
                "data": { "message": "Hello from the server!" },
            }),
        );
        Ok(())
    });
}
