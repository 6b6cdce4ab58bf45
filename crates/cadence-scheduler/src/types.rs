use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BoxError;

/// Error shared between the job-failed and scope-closing notifications.
pub type JobError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Converts a boxed boundary error into the shared form.
pub fn share(error: BoxError) -> JobError {
    Arc::from(error)
}

/// Type token identifying a concrete job type without reflection.
///
/// Equality and hashing use the `TypeId` only; the name is for logs.
#[derive(Clone, Copy)]
pub struct JobType {
    id: TypeId,
    name: &'static str,
}

impl JobType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, e.g. `Heartbeat` for `my_app::jobs::Heartbeat`.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for JobType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobType {}

impl Hash for JobType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobType").field(&self.name).finish()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Identifies one execution scope in logs and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(Uuid);

impl ScopeId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a single job unit failed.
#[derive(Debug, Clone)]
pub enum JobFailure {
    /// The provider could not open a scope. No scope exists, so no
    /// scope-closing notification follows.
    ScopeCreation { job_type: JobType, error: JobError },
    /// The scope opened but the job could not be resolved from it.
    Resolution { job_type: JobType, error: JobError },
    /// A scope-created subscriber failed; the job was resolved but not run.
    Setup { job_type: JobType, error: JobError },
    /// `execute()` returned an error or panicked.
    Execution { job_type: JobType, error: JobError },
}

impl JobFailure {
    pub fn job_type(&self) -> &JobType {
        match self {
            JobFailure::ScopeCreation { job_type, .. }
            | JobFailure::Resolution { job_type, .. }
            | JobFailure::Setup { job_type, .. }
            | JobFailure::Execution { job_type, .. } => job_type,
        }
    }

    pub fn error(&self) -> &JobError {
        match self {
            JobFailure::ScopeCreation { error, .. }
            | JobFailure::Resolution { error, .. }
            | JobFailure::Setup { error, .. }
            | JobFailure::Execution { error, .. } => error,
        }
    }

    /// False only when the failure happened before any scope existed.
    pub fn has_scope(&self) -> bool {
        !matches!(self, JobFailure::ScopeCreation { .. })
    }

    pub fn stage(&self) -> &'static str {
        match self {
            JobFailure::ScopeCreation { .. } => "scope_creation",
            JobFailure::Resolution { .. } => "resolution",
            JobFailure::Setup { .. } => "setup",
            JobFailure::Execution { .. } => "execution",
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {}", self.job_type(), self.stage(), self.error())
    }
}

/// Final state of one job unit within a tick.
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Succeeded { job_type: JobType },
    Failed(JobFailure),
    /// A notification subscriber failed outside the job-failure path, or
    /// the unit's task panicked. The scope, if any, was still closed.
    Aborted { job_type: JobType, reason: String },
}

impl UnitOutcome {
    pub fn job_type(&self) -> &JobType {
        match self {
            UnitOutcome::Succeeded { job_type } | UnitOutcome::Aborted { job_type, .. } => job_type,
            UnitOutcome::Failed(failure) => failure.job_type(),
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Monotonic tick number, 1-based per runner.
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<JobFailure>,
    pub aborted: usize,
    pub elapsed: Duration,
}

impl TickReport {
    pub fn new(tick: u64, attempted: usize) -> Self {
        Self {
            tick,
            started_at: Utc::now(),
            attempted,
            succeeded: 0,
            failures: Vec::new(),
            aborted: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Succeeded { .. } => self.succeeded += 1,
            UnitOutcome::Failed(failure) => self.failures.push(failure),
            UnitOutcome::Aborted { .. } => self.aborted += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted == 0
    }
}
