use crate::error::BoxError;
use crate::types::JobType;

/// A unit of background work run once per tick.
///
/// Every tick resolves a fresh instance from a fresh scope, so implementors
/// may keep per-run state in `self`. `execute` runs on the blocking pool and
/// may land on a different thread each time; blocking I/O is fine but holds
/// a worker permit for its whole duration.
pub trait Job: Send + Sync + 'static {
    /// Run the job. Returning an error, or panicking, marks this run failed.
    fn execute(&self) -> Result<(), BoxError>;

    /// Type token used by the registry and by `Scope::resolve`.
    fn job_type(&self) -> JobType {
        JobType::of::<Self>()
    }

    fn name(&self) -> &'static str {
        self.job_type().short_name()
    }
}
