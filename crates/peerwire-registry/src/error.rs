use thiserror::Error;

/// Failures surfaced by [`ConnectionRepository::add`](crate::ConnectionRepository::add).
///
/// Reads never fail; a miss is an absent result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry was closed; callers must stop registering connections.
    #[error("connection registry is closed")]
    Closed,
    #[error("connection registry is full ({limit} connections)")]
    Full { limit: usize },
}
