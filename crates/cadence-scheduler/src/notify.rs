use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::{BoxError, HandlerError};
use crate::job::Job;
use crate::provider::Scope;
use crate::types::{JobError, JobFailure, JobType, ScopeId};

pub type HandlerResult = Result<(), BoxError>;

/// Raised after a job was resolved in its new scope, before it runs.
pub struct ScopeCreated<'a> {
    pub scope_id: ScopeId,
    pub job_type: &'a JobType,
    pub scope: &'a dyn Scope,
}

/// Raised once per opened scope, right before it is released.
pub struct ScopeClosing<'a> {
    pub scope_id: ScopeId,
    pub job_type: &'a JobType,
    pub scope: &'a dyn Scope,
    pub succeeded: bool,
    /// Present exactly when `succeeded` is false.
    pub error: Option<&'a JobError>,
}

/// Raised when a unit fails. `job` is `None` when no instance was obtained.
pub struct JobFailed<'a> {
    pub job: Option<&'a dyn Job>,
    pub failure: &'a JobFailure,
}

type ScopeCreatedFn = dyn for<'a> Fn(&ScopeCreated<'a>) -> HandlerResult + Send + Sync;
type ScopeClosingFn = dyn for<'a> Fn(&ScopeClosing<'a>) -> HandlerResult + Send + Sync;
type JobFailedFn = dyn for<'a> Fn(&JobFailed<'a>) -> HandlerResult + Send + Sync;

/// Handle returned by every subscribe call; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<F: ?Sized> {
    id: SubscriptionId,
    /// Used for log correlation and in `HandlerError`.
    name: String,
    handler: Arc<F>,
}

impl<F: ?Sized> Clone for Subscriber<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Observer lists for the three lifecycle points.
///
/// Subscribers run synchronously on the worker executing the unit, in
/// registration order. The first error stops the chain and is handed back
/// to the engine. Dispatch works on a snapshot, so a handler may subscribe
/// or unsubscribe without deadlocking.
pub struct Notifier {
    scope_created: RwLock<Vec<Subscriber<ScopeCreatedFn>>>,
    scope_closing: RwLock<Vec<Subscriber<ScopeClosingFn>>>,
    job_failed: RwLock<Vec<Subscriber<JobFailedFn>>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            scope_created: RwLock::new(Vec::new()),
            scope_closing: RwLock::new(Vec::new()),
            job_failed: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on_scope_created<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ScopeCreated<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let subscriber = self.subscriber(name.into(), Arc::new(handler) as Arc<ScopeCreatedFn>);
        Self::push(&self.scope_created, subscriber, "scope_created")
    }

    pub fn on_scope_closing<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ScopeClosing<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let subscriber = self.subscriber(name.into(), Arc::new(handler) as Arc<ScopeClosingFn>);
        Self::push(&self.scope_closing, subscriber, "scope_closing")
    }

    pub fn on_job_failed<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&JobFailed<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let subscriber = self.subscriber(name.into(), Arc::new(handler) as Arc<JobFailedFn>);
        Self::push(&self.job_failed, subscriber, "job_failed")
    }

    /// Remove a subscription from whichever list holds it. Returns false if unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = Self::remove(&self.scope_created, id)
            || Self::remove(&self.scope_closing, id)
            || Self::remove(&self.job_failed, id);
        if removed {
            debug!(subscription = id.0, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.scope_created.read().expect("subscriber list poisoned").len()
            + self.scope_closing.read().expect("subscriber list poisoned").len()
            + self.job_failed.read().expect("subscriber list poisoned").len()
    }

    pub fn scope_created(&self, event: &ScopeCreated<'_>) -> Result<(), HandlerError> {
        for sub in Self::snapshot(&self.scope_created) {
            (sub.handler)(event).map_err(|source| Self::failed(sub.name, source, "scope_created"))?;
        }
        Ok(())
    }

    pub fn scope_closing(&self, event: &ScopeClosing<'_>) -> Result<(), HandlerError> {
        for sub in Self::snapshot(&self.scope_closing) {
            (sub.handler)(event).map_err(|source| Self::failed(sub.name, source, "scope_closing"))?;
        }
        Ok(())
    }

    pub fn job_failed(&self, event: &JobFailed<'_>) -> Result<(), HandlerError> {
        for sub in Self::snapshot(&self.job_failed) {
            (sub.handler)(event).map_err(|source| Self::failed(sub.name, source, "job_failed"))?;
        }
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn subscriber<F: ?Sized>(&self, name: String, handler: Arc<F>) -> Subscriber<F> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Subscriber { id, name, handler }
    }

    fn push<F: ?Sized>(
        list: &RwLock<Vec<Subscriber<F>>>,
        subscriber: Subscriber<F>,
        point: &'static str,
    ) -> SubscriptionId {
        let id = subscriber.id;
        debug!(name = %subscriber.name, point, subscription = id.0, "subscriber registered");
        list.write().expect("subscriber list poisoned").push(subscriber);
        id
    }

    fn remove<F: ?Sized>(list: &RwLock<Vec<Subscriber<F>>>, id: SubscriptionId) -> bool {
        let mut subs = list.write().expect("subscriber list poisoned");
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() < before
    }

    fn snapshot<F: ?Sized>(list: &RwLock<Vec<Subscriber<F>>>) -> Vec<Subscriber<F>> {
        list.read().expect("subscriber list poisoned").clone()
    }

    fn failed(subscriber: String, source: BoxError, point: &'static str) -> HandlerError {
        warn!(%subscriber, point, error = %source, "subscriber returned an error");
        HandlerError { subscriber, source }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
