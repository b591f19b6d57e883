//! Server facade: owns the hub, exposes the registration API, and builds
//! the Axum router that upgrades HTTP requests into sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::http::header::ORIGIN;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics::counter;
use roomcast_core::{EventMessage, HubError, SessionId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::events::HandlerResult;
use crate::hub::{Hub, HubOptions};
use crate::metrics as names;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::serve_socket;
use crate::websocket::session::Session;

type AuthGate = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;
type OriginCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The event hub server.
///
/// Cloning is cheap and every clone drives the same hub. Must be created
/// inside a Tokio runtime: [`Server::new`] spawns the hub loop.
#[derive(Clone)]
pub struct Server {
    config: Arc<ServerConfig>,
    hub: Hub,
    auth: Option<AuthGate>,
    origin: Option<OriginCheck>,
    shutdown: Arc<ShutdownCoordinator>,
    hub_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl Server {
    /// Create a server and start its hub loop.
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, runner) = Hub::new(HubOptions {
            queue_capacity: config.queue_capacity,
            allow_reserved_events: config.allow_reserved_events,
        });
        let hub_task = tokio::spawn(runner.run(shutdown.token()));
        Self {
            config: Arc::new(config),
            hub,
            auth: None,
            origin: None,
            shutdown,
            hub_task: Arc::new(parking_lot::Mutex::new(Some(hub_task))),
        }
    }

    /// Install a predicate consulted before every upgrade. Requests it
    /// rejects get `401 Unauthorized` and never become sessions.
    ///
    /// Origin filtering belongs in [`Server::with_origin_check`], which
    /// answers `403 Forbidden` instead.
    #[must_use]
    pub fn with_auth_gate<F>(mut self, gate: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.auth = Some(Arc::new(gate));
        self
    }

    /// Install a predicate over the request's `Origin` header. Requests
    /// whose origin it rejects get `403 Forbidden`. Requests without an
    /// `Origin` header (non-browser clients) are not checked; a header
    /// that is not valid UTF-8 is rejected.
    #[must_use]
    pub fn with_origin_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.origin = Some(Arc::new(check));
        self
    }

    /// Register an untyped handler for `event`, replacing any previous one.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Session>, Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.hub.events().on(event, handler);
    }

    /// Register a handler whose payload is decoded into `T` before it runs.
    pub fn on_typed<T, F>(&self, event: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(&Arc<Session>, T) -> HandlerResult + Send + Sync + 'static,
    {
        self.hub.events().on_typed(event, handler);
    }

    /// Append a middleware. Returning `false` drops the message.
    pub fn use_middleware<F>(&self, middleware: F)
    where
        F: Fn(&Arc<Session>, &EventMessage) -> bool + Send + Sync + 'static,
    {
        self.hub.middleware().push(middleware);
    }

    /// Send `event` to every registered session.
    ///
    /// Returns `false` once the hub has shut down.
    pub fn broadcast(&self, event: impl Into<String>, data: Value) -> bool {
        self.hub.broadcast_all(EventMessage::new(event, data), None)
    }

    /// Number of registered sessions.
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Sorted names of the non-empty rooms.
    pub fn room_names(&self) -> Vec<String> {
        self.hub.room_names()
    }

    /// Sorted member ids of `room`.
    pub fn room_members(&self, room: &str) -> Vec<SessionId> {
        self.hub.room_members(room)
    }

    /// Look up a registered session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.hub.session(id)
    }

    /// The hub handle.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Token cancelled when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Router with only the upgrade route mounted at `config.path`.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, get(upgrade_handler))
            .with_state(self.clone())
    }

    /// Mount the upgrade route onto an existing application router.
    pub fn attach(&self, router: Router) -> Router {
        router.merge(self.router())
    }

    /// Bind `config.host:config.port` and serve [`Server::router`] until
    /// shutdown. Returns the bound address and the serving task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), HubError> {
        self.serve(self.router()).await
    }

    /// Like [`Server::listen`] but serves an application router that
    /// already has the upgrade route attached.
    pub async fn serve(&self, app: Router) -> Result<(SocketAddr, JoinHandle<()>), HubError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.config.path, "listening");

        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting connections, close every session and wait for the
    /// hub loop to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.hub_task.lock().take().into_iter().collect();
        let _ = self.shutdown.graceful_shutdown(handles, None).await;
    }

    /// Whether [`Server::shutdown`] has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    fn authorize(&self, parts: &Parts) -> bool {
        self.auth.as_ref().is_none_or(|gate| gate(parts))
    }

    fn check_origin(&self, parts: &Parts) -> Result<(), HubError> {
        let (Some(check), Some(origin)) = (self.origin.as_ref(), parts.headers.get(ORIGIN)) else {
            return Ok(());
        };
        match origin.to_str() {
            Ok(origin) if check(origin) => Ok(()),
            Ok(origin) => Err(HubError::OriginRejected {
                origin: origin.to_owned(),
            }),
            Err(_) => Err(HubError::OriginRejected {
                origin: String::from_utf8_lossy(origin.as_bytes()).into_owned(),
            }),
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("auth_gate", &self.auth.is_some())
            .field("origin_check", &self.origin.is_some())
            .finish_non_exhaustive()
    }
}

/// GET `config.path`: origin check, auth gate, then WebSocket upgrade.
async fn upgrade_handler(State(server): State<Server>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();

    if let Err(err) = server.check_origin(&parts) {
        counter!(names::ORIGIN_REJECTED_TOTAL).increment(1);
        warn!(uri = %parts.uri, error = %err, "upgrade rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    if !server.authorize(&parts) {
        counter!(names::UNAUTHORIZED_TOTAL).increment(1);
        warn!(uri = %parts.uri, error = %HubError::Unauthorized, "upgrade rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if server.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &server).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(error = %rejection, "not a websocket upgrade");
            return rejection.into_response();
        }
    };

    let hub = server.hub.clone();
    upgrade
        .max_message_size(server.config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_socket(socket, hub))
}
