//! Credentials Cache (C): resolves a D-Bus peer's uid and AppArmor label.
//!
//! Concurrent lookups for the same peer are coalesced into a single bus
//! query (mirroring the in-flight de-duplication the original
//! `examples/original_source/src/service/credentialscache.cpp` performs),
//! and results are held in an LRU bounded to
//! [`CREDENTIALS_CACHE_CAPACITY`] peers. The original cache was unbounded;
//! bounding it here closes that growth path for a long-lived daemon.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};
use zbus::Connection;

use crate::domain::entities::Credentials;
use crate::domain::errors::CredentialsError;
use crate::domain::ports::CredentialsPort;

pub const CREDENTIALS_CACHE_CAPACITY: usize = 1024;

struct Inner {
    cache: LruCache<String, Credentials>,
    pending: HashMap<String, Vec<oneshot::Sender<Result<Credentials, CredentialsError>>>>,
}

/// Resolves and caches peer credentials over an existing bus connection.
pub struct CredentialsCache {
    connection: Connection,
    inner: Mutex<Inner>,
}

impl CredentialsCache {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            inner: Mutex::new(Inner {
                cache: LruCache::new(
                    NonZeroUsize::new(CREDENTIALS_CACHE_CAPACITY).expect("capacity is nonzero"),
                ),
                pending: HashMap::new(),
            }),
        }
    }

    /// Resolves a peer's credentials over the bus, never failing the
    /// caller: a bus-level error is logged and treated identically to a
    /// successful reply of `{valid: false}` (§4.3).
    async fn query_bus(&self, peer: &str) -> Credentials {
        match self.query_bus_fallible(peer).await {
            Ok(creds) => creds,
            Err(err) => {
                warn!(peer, %err, "credentials bus query failed, treating peer as invalid");
                Credentials::invalid()
            }
        }
    }

    async fn query_bus_fallible(&self, peer: &str) -> zbus::Result<Credentials> {
        let proxy = zbus::fdo::DBusProxy::new(&self.connection).await?;

        // `GetConnectionCredentials` returns a property dict keyed by
        // "UnixUserID" (u32) and, when confinement is active,
        // "LinuxSecurityLabel" (a nul-terminated byte string).
        let props = proxy.get_connection_credentials(peer).await?;

        let uid = props
            .get("UnixUserID")
            .and_then(|v| u32::try_from(v.clone()).ok())
            .unwrap_or(0);

        let label = props
            .get("LinuxSecurityLabel")
            .and_then(|v| Vec::<u8>::try_from(v.clone()).ok())
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\0')
                    .to_string()
            });

        Ok(match label {
            Some(label) if !label.is_empty() && label != "unconfined" => {
                Credentials::confined(uid, label)
            }
            _ => Credentials::unconfined(uid),
        })
    }
}

#[async_trait::async_trait]
impl CredentialsPort for CredentialsCache {
    async fn resolve(&self, peer: &str) -> Result<Credentials, CredentialsError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(creds) = inner.cache.get(peer) {
                trace!(peer, "credentials cache hit");
                return Ok(creds.clone());
            }
            if let Some(waiters) = inner.pending.get_mut(peer) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                drop(inner);
                return rx.await.map_err(|_| CredentialsError::PeerGone);
            }
            inner.pending.insert(peer.to_string(), Vec::new());
        }

        let creds = self.query_bus(peer).await;

        let mut inner = self.inner.lock().await;
        let waiters = inner.pending.remove(peer).unwrap_or_default();
        debug!(peer, uid = creds.uid, valid = creds.valid, "resolved peer credentials");
        inner.cache.put(peer.to_string(), creds.clone());
        for waiter in waiters {
            let _ = waiter.send(Ok(creds.clone()));
        }
        Ok(creds)
    }
}

/// A [`CredentialsPort`] for process-wide testing that never touches a bus.
pub struct StaticCredentials(pub Credentials);

#[async_trait::async_trait]
impl CredentialsPort for StaticCredentials {
    async fn resolve(&self, _peer: &str) -> Result<Credentials, CredentialsError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_always_resolve() {
        let port: Arc<dyn CredentialsPort> =
            Arc::new(StaticCredentials(Credentials::unconfined(1000)));
        let creds = port.resolve(":1.42").await.unwrap();
        assert_eq!(creds.uid, 1000);
        assert!(creds.valid);
    }
}
