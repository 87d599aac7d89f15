//! Manager
//!
//! Composition root of the live feed: owns the channel multiplexer, the
//! pending registry, the exposure directory, the route table and every
//! client session.
//!
//! ```text
//!   route handler / side channel ──expose──► Manager ──spawn──► Subscription
//!                                              │                    │
//!                          live session? ◄─────┘                    │ join
//!                            │ yes: attach     no: park             ▼
//!                            ▼                   ▼             ChannelMux
//!                      ClientSession      PendingRegistry
//! ```

mod directory;
mod routes;

pub use directory::ExposureDirectory;
pub use routes::{RouteError, RouteHandler, RouteRequest, RouteTable};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, Deliveries};
use crate::feed::ChannelMux;
use crate::store::DocumentStore;
use crate::subscription::{
    Exposure, PendingRegistry, Source, Subscription, SubscriptionContext, SubscriptionEvents,
    SubscriptionId,
};
use crate::websocket::{ClientPacket, ClientSession, ConnectionId, PacketError, ServerPacket};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a subscription waits for its connection
    pub subscription_timeout: Duration,
    /// Broker channel prefix for document feeds
    pub channel_prefix: String,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            subscription_timeout: Duration::from_secs(60),
            channel_prefix: "op:".to_string(),
            max_connections: 10_000,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection {0} is already open")]
    DuplicateConnection(String),
}

/// Point-in-time counters for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub sessions: usize,
    pub feeds: usize,
    pub pending: usize,
    pub exposures: usize,
}

pub struct Manager {
    config: ManagerConfig,
    store: Arc<dyn DocumentStore>,
    mux: Arc<ChannelMux>,
    pending: Arc<PendingRegistry>,
    directory: Arc<ExposureDirectory>,
    routes: RwLock<RouteTable>,
    sessions: RwLock<HashMap<ConnectionId, Arc<ClientSession>>>,
}

impl Manager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn Broker>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let mux = Arc::new(ChannelMux::new(broker, config.channel_prefix.clone()));
        let pending = Arc::new(PendingRegistry::new(config.subscription_timeout));

        Arc::new(Self {
            config,
            store,
            mux,
            pending,
            directory: Arc::new(ExposureDirectory::new()),
            routes: RwLock::new(RouteTable::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Start dispatching broker deliveries to document feeds
    pub fn start(&self, deliveries: Deliveries) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.mux).run(deliveries))
    }

    pub fn subscription_timeout(&self) -> Duration {
        self.config.subscription_timeout
    }

    /// Register a route handler for connections asking for `pattern`
    pub fn route(&self, pattern: &str, handler: Arc<dyn RouteHandler>) -> Result<(), RouteError> {
        self.routes.write().insert(pattern, handler)?;
        tracing::info!(pattern = %pattern, "Route registered");
        Ok(())
    }

    /// Expose a document under a fresh subscription id.
    ///
    /// With a `socket` the subscription starts right away and is attached
    /// to that connection, or parked until it connects. Without one the
    /// client attaches it later with a `subscribe` packet.
    pub fn expose(&self, exposure: Exposure, socket: Option<&str>) -> (SubscriptionId, Option<Subscription>) {
        let id = Uuid::new_v4().to_string();
        let subscription = self.expose_as(&id, exposure, socket);
        (id, subscription)
    }

    /// Like [`Manager::expose`] with a caller-chosen subscription id
    pub fn expose_as(&self, id: &str, exposure: Exposure, socket: Option<&str>) -> Option<Subscription> {
        self.directory.insert(id, &exposure);
        tracing::debug!(
            subscription_id = %id,
            document = %exposure.document,
            socket = ?socket,
            "Exposed document"
        );

        let socket = socket?;
        let (subscription, events) = self.spawn_subscription(id, Source::Exposed(exposure));
        self.deliver(socket, subscription.clone(), events);
        Some(subscription)
    }

    /// Drop the directory record once `subscription` is torn down
    fn forget_on_close(&self, subscription: &Subscription) {
        let directory = Arc::clone(&self.directory);
        let subscription = subscription.clone();
        tokio::spawn(async move {
            subscription.closed().await;
            directory.remove(subscription.id());
        });
    }

    /// Open a session for a new connection.
    ///
    /// Without a `sid` an id is generated and announced with an `i` packet.
    /// Subscriptions parked for the id are claimed, then the connection's
    /// route handlers run.
    pub async fn connect(
        &self,
        sid: Option<String>,
        route: Option<&str>,
        outbound: mpsc::UnboundedSender<ServerPacket>,
    ) -> Result<Arc<ClientSession>, ManagerError> {
        let (id, generated) = match sid.filter(|s| !s.is_empty()) {
            Some(sid) => (sid, false),
            None => (Uuid::new_v4().to_string(), true),
        };

        let session = {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.config.max_connections {
                return Err(ManagerError::TooManyConnections(self.config.max_connections));
            }
            if sessions.contains_key(&id) {
                return Err(ManagerError::DuplicateConnection(id));
            }
            let session = ClientSession::new(id.clone(), outbound);
            sessions.insert(id.clone(), Arc::clone(&session));
            session
        };

        if generated {
            session.send(ServerPacket::Identity { i: id.clone() });
        }
        tracing::info!(connection_id = %id, route = ?route, "Connection opened");

        for (subscription, events) in self.pending.claim(&id) {
            session.add(subscription, events);
        }

        if let Some(route) = route {
            self.run_routes(&session, route).await;
        }

        Ok(session)
    }

    /// Close a session and destroy its subscriptions
    pub fn disconnect(&self, connection_id: &str) {
        let session = self.sessions.write().remove(connection_id);
        if let Some(session) = session {
            session.close_all();
            tracing::info!(connection_id = %connection_id, "Connection closed");
        }
    }

    pub fn session(&self, connection_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(connection_id).cloned()
    }

    /// Handle one inbound frame; an error means the connection must close
    pub fn handle_message(&self, session: &Arc<ClientSession>, text: &str) -> Result<(), PacketError> {
        match ClientPacket::parse(text)? {
            Some(ClientPacket::Subscribe { id }) => {
                tracing::debug!(connection_id = %session.id(), subscription_id = %id, "Subscribe");
                let discovery = Arc::clone(&self.directory);
                let (subscription, events) = self.spawn_subscription(&id, Source::Discover(discovery));
                if session.add(subscription.clone(), events) {
                    self.forget_on_close(&subscription);
                }
            }
            Some(ClientPacket::Unsubscribe { id }) => {
                tracing::debug!(connection_id = %session.id(), subscription_id = %id, "Unsubscribe");
                session.remove(&id);
                self.directory.remove(&id);
            }
            None => {
                tracing::trace!(connection_id = %session.id(), "Ignoring unknown packet");
            }
        }
        Ok(())
    }

    pub async fn stats(&self) -> ManagerStats {
        let sessions = self.sessions.read().len();
        ManagerStats {
            sessions,
            feeds: self.mux.feed_count().await,
            pending: self.pending.len(),
            exposures: self.directory.len(),
        }
    }

    fn spawn_subscription(&self, id: &str, source: Source) -> (Subscription, SubscriptionEvents) {
        let context = SubscriptionContext::new(Arc::clone(&self.mux), Arc::clone(&self.store));
        Subscription::spawn(id, source, &context)
    }

    /// Attach to a live session or park until the connection shows up.
    ///
    /// The sessions lock is held while parking, so a concurrent `connect`
    /// either claims the parked entry or is found here.
    fn deliver(&self, socket: &str, subscription: Subscription, events: SubscriptionEvents) {
        self.forget_on_close(&subscription);

        let sessions = self.sessions.read();
        match sessions.get(socket) {
            Some(session) if !session.is_closed() => {
                let session = Arc::clone(session);
                drop(sessions);
                session.add(subscription, events);
            }
            _ => self.pending.buffer(socket, subscription, events),
        }
    }

    async fn run_routes(&self, session: &Arc<ClientSession>, route: &str) {
        let matched = self.routes.read().matches(route);
        if matched.is_empty() {
            tracing::debug!(connection_id = %session.id(), route = %route, "No route matched");
            return;
        }

        for (handler, params) in matched {
            let request = RouteRequest {
                connection_id: session.id().to_string(),
                route: route.to_string(),
                params,
            };
            match handler.handle(&request).await {
                Ok(exposures) => {
                    for exposure in exposures {
                        let (_, subscription) = self.expose(exposure, Some(session.id()));
                        if subscription.is_none() {
                            tracing::warn!(connection_id = %session.id(), "Route exposure was not started");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %session.id(), route = %route, error = %e, "Route handler failed");
                }
            }
        }
    }
}
