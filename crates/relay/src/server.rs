//! The two-role message relay.
//!
//! Exactly one connection may be bound to the "agent" role and one to the
//! "host" role at a time. A `register` envelope binds the sending
//! connection to the role named by `target` (last writer wins); every other
//! envelope is forwarded verbatim to whatever connection is bound to its
//! `target`. No queueing, no retries: a message with no live recipient is
//! dropped with a diagnostic, and recovery belongs to the agent's own
//! request/timeout logic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use atelier_core::{Directive, Envelope, Result, Role};

/// A connection currently bound to a role. The outbox feeds the writer
/// task owning the connection's WS sink.
#[derive(Clone)]
struct Peer {
    conn_id: u64,
    outbox: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct RoleSlots {
    agent: Option<Peer>,
    host: Option<Peer>,
}

impl RoleSlots {
    fn slot_mut(&mut self, role: Role) -> &mut Option<Peer> {
        match role {
            Role::Agent => &mut self.agent,
            Role::Host => &mut self.host,
        }
    }
}

/// What became of one inbound message. Surfaced for logging and tests.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Connection bound to a role; `replaced` is true when a prior binding
    /// was displaced.
    Registered { role: Role, replaced: bool },
    /// Forwarded verbatim to the connection bound to the role.
    Delivered(Role),
    /// No connection bound to the target role; message dropped.
    NoRoute(Role),
    /// The bound connection's transport is gone; message dropped.
    PeerClosed(Role),
    /// Not a valid envelope; message dropped.
    BadEnvelope,
}

/// Role bindings for one relay instance. Constructed Unbound/Unbound and
/// owned by the server, never process-global.
#[derive(Clone)]
pub struct RelayState {
    slots: Arc<Mutex<RoleSlots>>,
    next_conn_id: Arc<AtomicU64>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(RoleSlots::default())),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn admit(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Process one text frame from `conn_id`. `outbox` is the sender's own
    /// outbox, captured on a `register` so later traffic can reach it.
    pub fn handle_text(
        &self,
        conn_id: u64,
        outbox: &mpsc::UnboundedSender<String>,
        text: &str,
    ) -> RouteOutcome {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                warn!(conn_id, error = %e, "Dropping malformed envelope");
                return RouteOutcome::BadEnvelope;
            }
        };

        match envelope.directive() {
            Directive::Register(role) => {
                let peer = Peer {
                    conn_id,
                    outbox: outbox.clone(),
                };
                let prior = {
                    let mut slots = self.slots.lock().unwrap();
                    slots.slot_mut(role).replace(peer)
                };
                // The displaced connection stays open; it simply stops
                // receiving traffic for this role.
                let replaced = prior.is_some();
                if replaced {
                    info!(conn_id, role = %role, "Role re-registered, prior binding displaced");
                } else {
                    info!(conn_id, role = %role, "Role registered");
                }
                RouteOutcome::Registered { role, replaced }
            }
            Directive::Forward(role) => {
                let peer = {
                    let slots = self.slots.lock().unwrap();
                    match role {
                        Role::Agent => slots.agent.clone(),
                        Role::Host => slots.host.clone(),
                    }
                };
                match peer {
                    Some(peer) => {
                        // Forward the original text so the payload survives
                        // byte-for-byte, including fields we do not model.
                        if peer.outbox.send(text.to_string()).is_ok() {
                            debug!(conn_id, target = %role, "Envelope forwarded");
                            RouteOutcome::Delivered(role)
                        } else {
                            warn!(conn_id, target = %role, "Bound connection not writable, dropping");
                            RouteOutcome::PeerClosed(role)
                        }
                    }
                    None => {
                        warn!(conn_id, target = %role, "No route for target, dropping");
                        RouteOutcome::NoRoute(role)
                    }
                }
            }
        }
    }

    /// Unbind every role held by `conn_id`. Closing a connection that was
    /// never bound, or whose binding was already displaced, is a no-op.
    pub fn disconnect(&self, conn_id: u64) {
        let mut slots = self.slots.lock().unwrap();
        for role in [Role::Agent, Role::Host] {
            let slot = slots.slot_mut(role);
            if slot.as_ref().is_some_and(|p| p.conn_id == conn_id) {
                *slot = None;
                info!(conn_id, role = %role, "Role unbound on disconnect");
            }
        }
    }

    pub fn bound_roles(&self) -> Vec<Role> {
        let slots = self.slots.lock().unwrap();
        let mut roles = Vec::new();
        if slots.agent.is_some() {
            roles.push(Role::Agent);
        }
        if slots.host.is_some() {
            roles.push(Role::Host);
        }
        roles
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// The relay server: an axum app serving `/ws` upgrades plus a health
/// endpoint, with all routing state owned by the instance.
pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
}

impl RelayServer {
    /// Bind the listening socket. Use port 0 for an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(atelier_core::Error::Io)?;
        Ok(Self {
            listener,
            state: RelayState::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(atelier_core::Error::Io)
    }

    pub fn state(&self) -> RelayState {
        self.state.clone()
    }

    /// Serve until the process stops. Only transport-level failure to
    /// accept connections ends this; bad messages never do.
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Relay listening");

        let app = Router::new()
            .route("/ws", get(handle_ws_upgrade))
            .route("/health", get(health))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        axum::serve(self.listener, app)
            .await
            .map_err(atelier_core::Error::Io)?;
        Ok(())
    }
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: RelayState) {
    let conn_id = state.admit();
    info!(conn_id, "Connection admitted");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbox decouples routing from the socket: the writer task owns the
    // sink, and bound peers only ever hold the channel end.
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbox_rx.recv().await {
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(conn_id, error = %e, "WebSocket receive error");
                break;
            }
        };
        match msg {
            WsMessage::Text(text) => {
                state.handle_text(conn_id, &outbox_tx, &text);
            }
            WsMessage::Close(_) => break,
            // The protocol is text-only; binary frames are dropped like any
            // other unparseable input. Ping/pong is handled by axum.
            WsMessage::Binary(_) => {
                warn!(conn_id, "Dropping binary frame");
            }
            _ => {}
        }
    }

    state.disconnect(conn_id);
    drop(outbox_tx);
    writer.abort();
    info!(conn_id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::Envelope;
    use serde_json::json;

    fn outbox() -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        mpsc::unbounded_channel()
    }

    fn register_text(role: &str) -> String {
        format!(r#"{{"target": "{}", "command": "register"}}"#, role)
    }

    #[test]
    fn test_register_binds_role() {
        let state = RelayState::new();
        let (tx, _rx) = outbox();
        let outcome = state.handle_text(1, &tx, &register_text("host"));
        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                role: Role::Host,
                replaced: false
            }
        );
        assert_eq!(state.bound_roles(), vec![Role::Host]);
    }

    #[test]
    fn test_forward_verbatim() {
        let state = RelayState::new();
        let (host_tx, mut host_rx) = outbox();
        let (agent_tx, _agent_rx) = outbox();
        state.handle_text(1, &host_tx, &register_text("host"));
        state.handle_text(2, &agent_tx, &register_text("agent"));

        let raw = r#"{"target":"host","command":"create_layer","id":"1","payload":{"name":"bg"},"traceId":"t-9"}"#;
        let outcome = state.handle_text(2, &agent_tx, raw);
        assert_eq!(outcome, RouteOutcome::Delivered(Role::Host));
        // Byte-for-byte, unknown fields included.
        assert_eq!(host_rx.try_recv().unwrap(), raw);
    }

    #[test]
    fn test_register_is_not_forwarded() {
        let state = RelayState::new();
        let (host_tx, mut host_rx) = outbox();
        state.handle_text(1, &host_tx, &register_text("host"));
        // A second connection registering as host displaces the first but
        // nothing is delivered to either.
        let (other_tx, mut other_rx) = outbox();
        let outcome = state.handle_text(2, &other_tx, &register_text("host"));
        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                role: Role::Host,
                replaced: true
            }
        );
        assert!(host_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_no_route_before_register() {
        let state = RelayState::new();
        let (tx, _rx) = outbox();
        let env = serde_json::to_string(&Envelope::command(
            Role::Host,
            "x",
            "1",
            json!({}),
        ))
        .unwrap();
        assert_eq!(state.handle_text(1, &tx, &env), RouteOutcome::NoRoute(Role::Host));
    }

    #[test]
    fn test_malformed_envelope_dropped() {
        let state = RelayState::new();
        let (tx, _rx) = outbox();
        assert_eq!(state.handle_text(1, &tx, "not json"), RouteOutcome::BadEnvelope);
        assert_eq!(
            state.handle_text(1, &tx, r#"{"command": "register"}"#),
            RouteOutcome::BadEnvelope
        );
        assert_eq!(
            state.handle_text(1, &tx, r#"{"target": "narrator"}"#),
            RouteOutcome::BadEnvelope
        );
    }

    #[test]
    fn test_disconnect_unbinds_only_own_role() {
        let state = RelayState::new();
        let (host_tx, _h) = outbox();
        let (agent_tx, _a) = outbox();
        state.handle_text(1, &host_tx, &register_text("host"));
        state.handle_text(2, &agent_tx, &register_text("agent"));

        // An unrelated connection closing must not unbind anything.
        state.disconnect(99);
        assert_eq!(state.bound_roles(), vec![Role::Agent, Role::Host]);

        state.disconnect(1);
        assert_eq!(state.bound_roles(), vec![Role::Agent]);

        // Messages to the vacated role are now dropped.
        let env = serde_json::to_string(&Envelope::command(Role::Host, "x", "1", json!({})))
            .unwrap();
        assert_eq!(
            state.handle_text(2, &agent_tx, &env),
            RouteOutcome::NoRoute(Role::Host)
        );
    }

    #[test]
    fn test_displaced_binding_does_not_unbind_on_old_disconnect() {
        let state = RelayState::new();
        let (first_tx, _f) = outbox();
        let (second_tx, mut second_rx) = outbox();
        state.handle_text(1, &first_tx, &register_text("host"));
        state.handle_text(2, &second_tx, &register_text("host"));

        // The displaced connection closing must not evict the new binding.
        state.disconnect(1);
        assert_eq!(state.bound_roles(), vec![Role::Host]);

        let (agent_tx, _a) = outbox();
        let env = serde_json::to_string(&Envelope::command(Role::Host, "x", "1", json!({})))
            .unwrap();
        assert_eq!(
            state.handle_text(3, &agent_tx, &env),
            RouteOutcome::Delivered(Role::Host)
        );
        assert!(second_rx.try_recv().is_ok());
    }

    #[test]
    fn test_closed_outbox_is_dropped_not_crashed() {
        let state = RelayState::new();
        let (host_tx, host_rx) = outbox();
        state.handle_text(1, &host_tx, &register_text("host"));
        drop(host_rx);
        drop(host_tx);

        let (agent_tx, _a) = outbox();
        let env = serde_json::to_string(&Envelope::command(Role::Host, "x", "1", json!({})))
            .unwrap();
        assert_eq!(
            state.handle_text(2, &agent_tx, &env),
            RouteOutcome::PeerClosed(Role::Host)
        );
    }

    #[test]
    fn test_rebind_after_disconnect() {
        let state = RelayState::new();
        let (old_tx, _o) = outbox();
        state.handle_text(1, &old_tx, &register_text("host"));
        state.disconnect(1);

        let (new_tx, mut new_rx) = outbox();
        state.handle_text(2, &new_tx, &register_text("host"));

        let (agent_tx, _a) = outbox();
        let raw = r#"{"target":"host","command":"ping","id":"7"}"#;
        assert_eq!(
            state.handle_text(3, &agent_tx, raw),
            RouteOutcome::Delivered(Role::Host)
        );
        assert_eq!(new_rx.try_recv().unwrap(), raw);
    }
}
