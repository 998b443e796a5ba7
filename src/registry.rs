//! Registry of client instances keyed by external connection id.
//!
//! The web-facing notification layer scopes one [`TelemetryClient`] per
//! remote connection. This registry is the explicit, handle-passed form of
//! that mapping: an entry is created when a remote asks to connect and
//! removed (with the client shut down) when it disconnects or its
//! connection is lost. No ambient global state; whoever needs the registry
//! receives a reference to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::TelemetryClient;

/// Mapping from external connection id to its owned client.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<TelemetryClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the client for `id`, returning the replaced instance if the id
    /// was already present (the caller decides whether to shut it down).
    pub fn insert(
        &self,
        id: impl Into<String>,
        client: TelemetryClient,
    ) -> Option<Arc<TelemetryClient>> {
        let mut clients = self.clients.lock().expect("client registry poisoned");
        clients.insert(id.into(), Arc::new(client))
    }

    /// Look up the client for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<TelemetryClient>> {
        let clients = self.clients.lock().expect("client registry poisoned");
        clients.get(id).cloned()
    }

    /// Remove and shut down the client for `id`. Returns whether an entry
    /// existed.
    pub async fn remove(&self, id: &str) -> bool {
        let client = {
            let mut clients = self.clients.lock().expect("client registry poisoned");
            clients.remove(id)
        };
        match client {
            Some(client) => {
                client.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Remove and shut down every client.
    pub async fn shutdown_all(&self) {
        let clients: Vec<_> = {
            let mut clients = self.clients.lock().expect("client registry poisoned");
            clients.drain().map(|(_, client)| client).collect()
        };
        for client in clients {
            client.shutdown().await;
        }
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.lock().expect("client registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
