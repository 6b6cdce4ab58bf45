use std::any::Any;
use std::ops::Deref;

use tracing::debug;

use crate::error::BoxError;
use crate::job::Job;
use crate::types::{JobType, ScopeId};

/// Opens isolated resolution scopes. Implemented by the host's container.
pub trait ScopeProvider: Send + Sync {
    fn create_scope(&self) -> Result<Box<dyn Scope>, BoxError>;
}

/// One isolation boundary for dependency resolution.
///
/// A scope is opened per job per tick and closed right after the job
/// returns. `close` is where a host commits or rolls back its unit of work.
pub trait Scope {
    /// Resolve a fresh instance of `job_type`.
    fn resolve(&self, job_type: &JobType) -> Result<Box<dyn Job>, BoxError>;

    /// Resolve one instance of every registered job. Used only by discovery.
    fn resolve_all(&self) -> Result<Vec<Box<dyn Job>>, BoxError>;

    /// Called exactly once when the scope is released. Must not panic.
    fn close(&mut self) {}

    /// Concrete scope for subscribers that need to downcast it.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Owns an open scope and closes it when dropped, unwinding included.
pub struct ScopeGuard {
    id: ScopeId,
    scope: Box<dyn Scope>,
}

impl ScopeGuard {
    pub fn new(scope: Box<dyn Scope>) -> Self {
        let id = ScopeId::new();
        debug!(scope_id = %id, "scope opened");
        Self { id, scope }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl Deref for ScopeGuard {
    type Target = dyn Scope;

    fn deref(&self) -> &Self::Target {
        self.scope.as_ref()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.close();
        debug!(scope_id = %self.id, "scope closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingScope {
        closed: Arc<AtomicUsize>,
    }

    impl Scope for CountingScope {
        fn resolve(&self, job_type: &JobType) -> Result<Box<dyn Job>, BoxError> {
            Err(format!("{job_type} is not registered").into())
        }

        fn resolve_all(&self) -> Result<Vec<Box<dyn Job>>, BoxError> {
            Ok(Vec::new())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_closes_exactly_once_on_drop() {
        let closed = Arc::new(AtomicUsize::new(0));
        let guard = ScopeGuard::new(Box::new(CountingScope { closed: Arc::clone(&closed) }));
        assert!(guard.resolve_all().unwrap().is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_closes_while_unwinding() {
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_in = Arc::clone(&closed);
        let result = std::panic::catch_unwind(move || {
            let _guard = ScopeGuard::new(Box::new(CountingScope { closed: closed_in }));
            panic!("subscriber blew up");
        });
        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
