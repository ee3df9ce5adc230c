//! Connection registry
//!
//! Holds at most one open streaming connection per origin. Connections are
//! opened lazily on first demand and closed when released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::CredentialProvider;
use crate::error::{ConnectionError, Result};
use crate::transport::{Connection, Transport};

use super::config::RegistryConfig;
use super::key::Origin;

type Gate = Arc<Mutex<()>>;

/// Owner of every streaming connection
///
/// Opens and closes for one origin are serialized by that origin's gate, so
/// two callers racing on the same origin can never open it twice. The
/// connection map itself is only locked for lookups and updates, never
/// across a network call.
pub struct StreamRegistry {
    connections: Mutex<HashMap<Origin, Arc<dyn Connection>>>,
    gates: Mutex<HashMap<Origin, Gate>>,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    config: RegistryConfig,
}

impl StreamRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            credentials,
            transport,
            config,
        }
    }

    /// Return the connection for `origin`, opening it if needed
    ///
    /// On failure nothing is stored.
    pub async fn ensure_connection(&self, origin: &Origin) -> Result<Arc<dyn Connection>> {
        let gate = self.gate(origin).await;

        if let Some(connection) = self.connection(origin).await {
            return Ok(connection);
        }

        let opened = self.open(origin).await;
        if opened.is_err() {
            self.prune_gate(origin, gate).await;
        }
        opened
    }

    async fn open(&self, origin: &Origin) -> Result<Arc<dyn Connection>> {
        let token = self.credentials.resolve_token(origin)?;
        let timeout = self.config.open_timeout;
        let connection = tokio::time::timeout(timeout, self.transport.open(origin, &token))
            .await
            .map_err(|_| ConnectionError::Timeout {
                origin: origin.clone(),
                after: timeout,
            })??;

        let count = {
            let mut connections = self.connections.lock().await;
            connections.insert(origin.clone(), Arc::clone(&connection));
            connections.len()
        };

        tracing::info!(
            origin = %origin,
            anonymous = token.is_anonymous(),
            connections = count,
            "Connection opened"
        );

        Ok(connection)
    }

    /// Close and forget the connection for `origin`
    pub async fn release_connection(&self, origin: &Origin) {
        let gate = self.gate(origin).await;

        let removed = {
            let mut connections = self.connections.lock().await;
            connections
                .remove(origin)
                .map(|connection| (connection, connections.len()))
        };

        let Some((connection, remaining)) = removed else {
            self.prune_gate(origin, gate).await;
            tracing::trace!(origin = %origin, "Release of absent connection ignored");
            return;
        };

        connection.close().await;
        self.prune_gate(origin, gate).await;

        tracing::info!(
            origin = %origin,
            connections = remaining,
            "Connection closed"
        );
    }

    async fn connection(&self, origin: &Origin) -> Option<Arc<dyn Connection>> {
        self.connections.lock().await.get(origin).cloned()
    }

    // The gate table lock is released before waiting on the gate itself
    async fn gate(&self, origin: &Origin) -> OwnedMutexGuard<()> {
        let gate = Arc::clone(self.gates.lock().await.entry(origin.clone()).or_default());
        gate.lock_owned().await
    }

    // Forget an origin's gate once nobody else is queued on it
    async fn prune_gate(&self, origin: &Origin, gate: OwnedMutexGuard<()>) {
        let mut gates = self.gates.lock().await;
        let idle = gates.get(origin).is_some_and(|current| {
            Arc::ptr_eq(current, OwnedMutexGuard::mutex(&gate)) && Arc::strong_count(current) == 2
        });
        if idle {
            gates.remove(origin);
        }
    }

    /// Check if a connection to `origin` is open
    pub async fn is_connected(&self, origin: &Origin) -> bool {
        self.connections.lock().await.contains_key(origin)
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}
