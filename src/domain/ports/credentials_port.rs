//! Port for resolving a D-Bus peer's identity and confinement label (C).

use crate::domain::entities::Credentials;
use crate::domain::errors::CredentialsError;

#[async_trait::async_trait]
pub trait CredentialsPort: Send + Sync {
    /// Resolves `peer` (a unique D-Bus connection name), coalescing
    /// concurrent lookups for the same peer into one bus query.
    async fn resolve(&self, peer: &str) -> Result<Credentials, CredentialsError>;
}
