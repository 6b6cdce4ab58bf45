use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{BoxError, JobPanicked, Result, SchedulerError};
use crate::provider::{ScopeGuard, ScopeProvider};
use crate::types::JobType;

/// Ordered, immutable set of discovered job types.
///
/// Replaced wholesale on every `start()`; ticks hold an `Arc` snapshot.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    types: Arc<[JobType]>,
}

impl JobRegistry {
    pub fn from_types(types: Vec<JobType>) -> Self {
        Self { types: types.into() }
    }

    /// Enumerate job types by resolving every job once in a throwaway scope.
    ///
    /// The discovery instances are dropped before the scope closes; each
    /// tick later resolves its own.
    pub fn discover(provider: &dyn ScopeProvider) -> Result<Self> {
        let discovered = catch_unwind(AssertUnwindSafe(|| enumerate(provider)));

        let types = match discovered {
            Ok(Ok(types)) => types,
            Ok(Err(e)) => return Err(SchedulerError::Discovery(e)),
            Err(payload) => {
                return Err(SchedulerError::Discovery(Box::new(JobPanicked::from_payload(
                    payload,
                ))))
            }
        };

        info!(
            count = types.len(),
            jobs = ?types.iter().map(JobType::short_name).collect::<Vec<_>>(),
            "job types discovered"
        );
        Ok(Self::from_types(types))
    }

    pub fn snapshot(&self) -> Arc<[JobType]> {
        Arc::clone(&self.types)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.types.contains(job_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobType> {
        self.types.iter()
    }
}

fn enumerate(provider: &dyn ScopeProvider) -> std::result::Result<Vec<JobType>, BoxError> {
    let scope = ScopeGuard::new(provider.create_scope()?);
    let jobs = scope.resolve_all()?;
    let mut types: Vec<JobType> = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let job_type = job.job_type();
        if types.contains(&job_type) {
            debug!(job = %job_type, "duplicate registration ignored");
        } else {
            types.push(job_type);
        }
    }
    drop(jobs);
    Ok(types)
}
