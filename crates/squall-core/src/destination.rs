//! Resolving a named destination (queue or bucket), creating it when missing.

use async_trait::async_trait;
use tracing::{info, warn};

/// Error classification needed by [`resolve_or_create`].
pub trait Resolution {
    /// The destination does not exist.
    fn is_not_found(&self) -> bool;

    /// Creation failed because the caller already owns the destination.
    fn is_already_owned(&self) -> bool;
}

/// A service that can look up and create named destinations.
#[async_trait]
pub trait Destination: Send + Sync {
    type Handle: Send;
    type Error: Resolution + std::fmt::Display + Send;

    /// Short noun used in log messages ("queue", "bucket").
    fn kind(&self) -> &'static str;

    async fn lookup(&self, name: &str) -> Result<Self::Handle, Self::Error>;

    async fn create(&self, name: &str) -> Result<Self::Handle, Self::Error>;
}

/// Resolve `name` to a handle, creating the destination if it does not exist.
///
/// A creation attempt that reports the destination as already owned by the
/// caller is treated as success and followed by a second lookup. Any other
/// error is returned unchanged, so a manager is never left pointing at a
/// destination that does not exist.
pub async fn resolve_or_create<D>(destination: &D, name: &str) -> Result<D::Handle, D::Error>
where
    D: Destination + ?Sized,
{
    let kind = destination.kind();

    match destination.lookup(name).await {
        Ok(handle) => {
            info!("{kind} '{name}' found.");
            Ok(handle)
        }
        Err(e) if e.is_not_found() => {
            warn!("{kind} '{name}' not found. Creating a new {kind}.");
            match destination.create(name).await {
                Ok(handle) => {
                    info!("{kind} '{name}' created successfully.");
                    Ok(handle)
                }
                Err(e) if e.is_already_owned() => {
                    info!("{kind} '{name}' already owned, resolving again.");
                    destination.lookup(name).await
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fmt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Missing,
        Owned,
        Denied,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Resolution for FakeError {
        fn is_not_found(&self) -> bool {
            matches!(self, FakeError::Missing)
        }

        fn is_already_owned(&self) -> bool {
            matches!(self, FakeError::Owned)
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        existing: Mutex<HashSet<String>>,
        creates: AtomicUsize,
        /// Creation reports "already owned" but still registers the name.
        racing: bool,
        deny_lookup: bool,
    }

    #[async_trait]
    impl Destination for FakeRegistry {
        type Handle = String;
        type Error = FakeError;

        fn kind(&self) -> &'static str {
            "queue"
        }

        async fn lookup(&self, name: &str) -> Result<String, FakeError> {
            if self.deny_lookup {
                return Err(FakeError::Denied);
            }
            if self.existing.lock().unwrap().contains(name) {
                Ok(format!("handle://{name}"))
            } else {
                Err(FakeError::Missing)
            }
        }

        async fn create(&self, name: &str) -> Result<String, FakeError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.existing.lock().unwrap().insert(name.to_string());
            if self.racing {
                Err(FakeError::Owned)
            } else {
                Ok(format!("handle://{name}"))
            }
        }
    }

    #[tokio::test]
    async fn test_missing_destination_is_created_once() {
        let registry = FakeRegistry::default();

        let first = resolve_or_create(&registry, "jobs").await.unwrap();
        let second = resolve_or_create(&registry, "jobs").await.unwrap();

        assert_eq!(first, "handle://jobs");
        assert_eq!(second, first);
        assert_eq!(registry.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_destination_is_not_created() {
        let registry = FakeRegistry::default();
        registry.existing.lock().unwrap().insert("jobs".to_string());

        resolve_or_create(&registry, "jobs").await.unwrap();

        assert_eq!(registry.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_owned_counts_as_success() {
        let registry = FakeRegistry {
            racing: true,
            ..Default::default()
        };

        let handle = resolve_or_create(&registry, "jobs").await.unwrap();

        assert_eq!(handle, "handle://jobs");
    }

    #[tokio::test]
    async fn test_other_lookup_errors_are_fatal() {
        let registry = FakeRegistry {
            deny_lookup: true,
            ..Default::default()
        };

        let err = resolve_or_create(&registry, "jobs").await.unwrap_err();

        assert_eq!(err, FakeError::Denied);
        assert_eq!(registry.creates.load(Ordering::SeqCst), 0);
    }
}
