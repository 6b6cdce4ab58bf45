use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{HandlerError, JobPanicked};
use crate::job::Job;
use crate::notify::{JobFailed, Notifier, ScopeClosing, ScopeCreated};
use crate::provider::{ScopeGuard, ScopeProvider};
use crate::types::{share, JobError, JobFailure, JobType, TickReport, UnitOutcome};

/// Runs every job type of a registry snapshot once, each in its own scope.
///
/// Units execute on the Tokio blocking pool. The semaphore is shared by all
/// ticks of the same engine, so overlapping ticks compete for the same
/// `max_parallel_jobs` permits.
pub struct ExecutionEngine {
    provider: Arc<dyn ScopeProvider>,
    notifier: Arc<Notifier>,
    permits: Arc<Semaphore>,
}

impl ExecutionEngine {
    pub fn new(provider: Arc<dyn ScopeProvider>, notifier: Arc<Notifier>, parallelism: usize) -> Self {
        Self {
            provider,
            notifier,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Fan out one unit per job type and wait for all of them.
    pub async fn run_tick(self: &Arc<Self>, tick: u64, jobs: Arc<[JobType]>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::new(tick, jobs.len());
        let mut units = JoinSet::new();

        for job_type in jobs.iter().copied() {
            let engine = Arc::clone(self);
            units.spawn(async move {
                // The semaphore is never closed, so acquisition only fails if
                // the engine itself is torn down mid-tick.
                let Ok(_permit) = Arc::clone(&engine.permits).acquire_owned().await else {
                    return UnitOutcome::Aborted {
                        job_type,
                        reason: "worker pool closed".to_string(),
                    };
                };
                match tokio::task::spawn_blocking(move || engine.run_unit(&job_type)).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let reason = if e.is_panic() {
                            JobPanicked::from_payload(e.into_panic()).to_string()
                        } else {
                            e.to_string()
                        };
                        error!(job = %job_type, %reason, "job unit aborted");
                        UnitOutcome::Aborted { job_type, reason }
                    }
                }
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!("job unit task failed: {e}");
                    report.aborted += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        if report.is_clean() {
            info!(
                tick,
                jobs = report.attempted,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "tick completed"
            );
        } else {
            warn!(
                tick,
                jobs = report.attempted,
                succeeded = report.succeeded,
                failed = report.failures.len(),
                aborted = report.aborted,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "tick completed with failures"
            );
        }
        report
    }

    /// Run one job type through its full scope lifecycle on the current thread.
    ///
    /// Failures are caught at two levels: scope creation (no scope, so no
    /// closing notification) and resolve/setup/execute inside the scope.
    /// Subscriber errors outside that inner region abort the unit; the scope
    /// guard still closes the scope.
    pub fn run_unit(&self, job_type: &JobType) -> UnitOutcome {
        let scope = match catch_unwind(AssertUnwindSafe(|| self.provider.create_scope())) {
            Ok(Ok(scope)) => ScopeGuard::new(scope),
            Ok(Err(e)) => return self.scope_unavailable(job_type, share(e)),
            Err(payload) => {
                let error: JobError = Arc::new(JobPanicked::from_payload(payload));
                return self.scope_unavailable(job_type, error);
            }
        };
        let scope_id = scope.id();

        let mut job: Option<Box<dyn Job>> = None;
        let mut executing = false;
        let attempt = catch_unwind(AssertUnwindSafe(|| -> Result<(), JobFailure> {
            let resolved = scope.resolve(job_type).map_err(|e| JobFailure::Resolution {
                job_type: *job_type,
                error: share(e),
            })?;
            let job = job.insert(resolved);

            self.notifier
                .scope_created(&ScopeCreated { scope_id, job_type, scope: &*scope })
                .map_err(|e| JobFailure::Setup {
                    job_type: *job_type,
                    error: share(Box::new(e)),
                })?;

            debug!(job = %job_type, %scope_id, "executing job");
            executing = true;
            job.execute().map_err(|e| JobFailure::Execution {
                job_type: *job_type,
                error: share(e),
            })
        }));

        let result = attempt.unwrap_or_else(|payload| {
            let error: JobError = Arc::new(JobPanicked::from_payload(payload));
            let job_type = *job_type;
            Err(if executing {
                JobFailure::Execution { job_type, error }
            } else if job.is_some() {
                JobFailure::Setup { job_type, error }
            } else {
                JobFailure::Resolution { job_type, error }
            })
        });

        match result {
            Ok(()) => {
                let closing = ScopeClosing {
                    scope_id,
                    job_type,
                    scope: &*scope,
                    succeeded: true,
                    error: None,
                };
                if let Err(e) = self.notifier.scope_closing(&closing) {
                    error!(job = %job_type, %scope_id, error = %e, "scope-closing subscriber failed");
                    return UnitOutcome::Aborted { job_type: *job_type, reason: e.to_string() };
                }
                debug!(job = %job_type, %scope_id, "job succeeded");
                UnitOutcome::Succeeded { job_type: *job_type }
            }
            Err(failure) => {
                error!(
                    job = %job_type,
                    %scope_id,
                    stage = failure.stage(),
                    error = %failure.error(),
                    "job failed"
                );
                if let Err(reason) = self.notify_failure(job.as_deref(), &failure, |notifier| {
                    notifier.scope_closing(&ScopeClosing {
                        scope_id,
                        job_type,
                        scope: &*scope,
                        succeeded: false,
                        error: Some(failure.error()),
                    })
                }) {
                    return UnitOutcome::Aborted { job_type: *job_type, reason };
                }
                UnitOutcome::Failed(failure)
            }
        }
        // `job` drops before `scope`, then the guard closes the scope.
    }

    // --- private helpers ---------------------------------------------------

    fn scope_unavailable(&self, job_type: &JobType, error: JobError) -> UnitOutcome {
        warn!(job = %job_type, error = %error, "could not create execution scope");
        let failure = JobFailure::ScopeCreation { job_type: *job_type, error };
        if let Err(reason) = self.notify_failure(None, &failure, |_| Ok(())) {
            return UnitOutcome::Aborted { job_type: *job_type, reason };
        }
        UnitOutcome::Failed(failure)
    }

    /// Raise job-failed, then the follow-up closing notification if any.
    fn notify_failure<F>(
        &self,
        job: Option<&dyn Job>,
        failure: &JobFailure,
        then: F,
    ) -> Result<(), String>
    where
        F: FnOnce(&Notifier) -> Result<(), HandlerError>,
    {
        self.notifier
            .job_failed(&JobFailed { job, failure })
            .and_then(|()| then(&self.notifier))
            .map_err(|e| {
                error!(job = %failure.job_type(), error = %e, "failure subscriber failed");
                e.to_string()
            })
    }
}
