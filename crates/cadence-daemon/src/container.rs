//! Minimal factory-backed scope provider for hosts without a DI container.

use std::sync::Arc;

use cadence_scheduler::{BoxError, Job, JobType, Scope, ScopeProvider};
use tracing::trace;

type Factory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Registered job factories; every scope sees the same fixed set.
#[derive(Default)]
pub struct StaticProvider {
    factories: Vec<(JobType, Factory)>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `J`, built fresh by `factory` on every resolution.
    pub fn with_job<J, F>(mut self, factory: F) -> Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Box<dyn Job>);
        self.factories.push((JobType::of::<J>(), factory));
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }
}

impl ScopeProvider for StaticProvider {
    fn create_scope(&self) -> Result<Box<dyn Scope>, BoxError> {
        Ok(Box::new(StaticScope {
            factories: self.factories.clone(),
        }))
    }
}

struct StaticScope {
    factories: Vec<(JobType, Factory)>,
}

impl Scope for StaticScope {
    fn resolve(&self, job_type: &JobType) -> Result<Box<dyn Job>, BoxError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(t, _)| t == job_type)
            .ok_or_else(|| format!("no factory registered for {job_type}"))?;
        Ok(factory())
    }

    fn resolve_all(&self) -> Result<Vec<Box<dyn Job>>, BoxError> {
        Ok(self.factories.iter().map(|(_, factory)| factory()).collect())
    }

    fn close(&mut self) {
        trace!("static scope closed");
    }
}
