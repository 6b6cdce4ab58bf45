use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use cadence_core::{millis_ceil, OverlapPolicy, SchedulerConfig};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::ExecutionEngine;
use crate::error::{Result, SchedulerError};
use crate::notify::Notifier;
use crate::provider::ScopeProvider;
use crate::registry::JobRegistry;
use crate::types::{JobType, TickReport};

const IDLE_POLL: Duration = Duration::from_millis(10);

enum TimerState {
    /// Constructed, never armed.
    Inert,
    Armed {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    /// Disarmed by `stop()`; may be armed again.
    Stopped,
    Released,
}

impl TimerState {
    fn disarm(&mut self, next: TimerState) {
        if let TimerState::Armed { cancel, .. } = std::mem::replace(self, next) {
            cancel.cancel();
        }
    }
}

/// State shared between the runner and its timer task.
struct Shared {
    engine: Arc<ExecutionEngine>,
    registry: RwLock<JobRegistry>,
    ticks: AtomicU64,
    in_flight: AtomicUsize,
    /// Held for the whole of a queued tick, so a loop armed by a repeated
    /// `start()` waits for the previous loop's tick.
    queue: tokio::sync::Mutex<()>,
}

impl Shared {
    async fn run_tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let jobs = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        self.engine
            .run_tick(tick, jobs)
            .instrument(info_span!("tick", tick))
            .await
    }
}

/// Holds one slot of the in-flight tick counter, released on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }

    /// Take over a slot that was already reserved with `fetch_add`.
    fn adopt(counter: &'a AtomicUsize) -> Self {
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-interval runner: discovers job types on `start()` and executes all
/// of them once per tick, each in an isolated scope.
///
/// Ticks are allowed to overlap by default; see [`OverlapPolicy`].
pub struct JobRunner {
    provider: Arc<dyn ScopeProvider>,
    notifier: Arc<Notifier>,
    shared: Arc<Shared>,
    config: Mutex<SchedulerConfig>,
    state: Mutex<TimerState>,
}

impl JobRunner {
    pub fn new(provider: Arc<dyn ScopeProvider>, config: SchedulerConfig) -> Self {
        let notifier = Arc::new(Notifier::new());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&provider),
            Arc::clone(&notifier),
            config.parallelism(),
        ));
        Self {
            provider,
            notifier,
            shared: Arc::new(Shared {
                engine,
                registry: RwLock::new(JobRegistry::default()),
                ticks: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                queue: tokio::sync::Mutex::new(()),
            }),
            config: Mutex::new(config),
            state: Mutex::new(TimerState::Inert),
        }
    }

    /// Subscription point for scope-created, scope-closing and job-failed.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Delay before the first tick. Applies from the next `start()`.
    pub fn set_start_interval(&self, interval: Duration) {
        self.config().start_interval_ms = millis_ceil(interval);
    }

    /// Interval between ticks. Applies from the next `start()`.
    pub fn set_execute_interval(&self, interval: Duration) {
        self.config().execute_interval_ms = millis_ceil(interval);
    }

    pub fn set_overlap_policy(&self, policy: OverlapPolicy) {
        self.config().overlap = policy;
    }

    /// Discover job types and arm the timer.
    ///
    /// Discovery runs synchronously; if it fails the error is returned and
    /// the timer is left exactly as it was. Calling `start()` on an armed
    /// runner re-runs discovery and restarts the timer.
    pub fn start(&self) -> Result<()> {
        let config = self.config().clone();
        config.validate()?;

        let mut state = self.state();
        if matches!(*state, TimerState::Released) {
            return Err(SchedulerError::Released);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let registry = JobRegistry::discover(self.provider.as_ref())?;
        let count = registry.len();
        *self
            .shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = registry;

        let cancel = CancellationToken::new();
        let task = runtime.spawn(timer_loop(
            Arc::clone(&self.shared),
            cancel.clone(),
            config.start_interval(),
            config.execute_interval(),
            config.overlap,
        ));
        state.disarm(TimerState::Armed { cancel, task });

        info!(
            jobs = count,
            start_ms = config.start_interval_ms,
            every_ms = config.execute_interval_ms,
            overlap = ?config.overlap,
            "scheduler armed"
        );
        Ok(())
    }

    /// Disarm the timer. In-flight ticks run to completion; the registry is kept.
    pub fn stop(&self) {
        let mut state = self.state();
        if matches!(*state, TimerState::Armed { .. }) {
            state.disarm(TimerState::Stopped);
            info!("scheduler stopped");
        }
    }

    /// Disarm permanently. Safe to call repeatedly.
    pub fn release(&self) {
        let mut state = self.state();
        if !matches!(*state, TimerState::Released) {
            state.disarm(TimerState::Released);
            info!("scheduler released");
        }
    }

    /// Run one tick now against the current registry, independent of the timer.
    pub async fn run_now(&self) -> TickReport {
        let _slot = InFlight::enter(&self.shared.in_flight);
        self.shared.run_tick().await
    }

    /// Wait until no tick is in flight, polling every few milliseconds.
    /// Returns false if ticks were still running when `timeout` elapsed.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            while self.ticks_in_flight() > 0 {
                tokio::time::sleep(IDLE_POLL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// True while the timer task is scheduled and alive.
    pub fn is_armed(&self) -> bool {
        matches!(&*self.state(), TimerState::Armed { task, .. } if !task.is_finished())
    }

    pub fn is_released(&self) -> bool {
        matches!(*self.state(), TimerState::Released)
    }

    pub fn ticks_in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Ticks started so far, timer-driven and manual.
    pub fn ticks_started(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    // --- private helpers ---------------------------------------------------

    fn config(&self) -> MutexGuard<'_, SchedulerConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.state().disarm(TimerState::Released);
    }
}

async fn timer_loop(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    start_interval: Duration,
    execute_interval: Duration,
    overlap: OverlapPolicy,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(start_interval) => {}
    }

    // First tick of `interval` completes immediately.
    let mut interval = tokio::time::interval(execute_interval);
    interval.set_missed_tick_behavior(match overlap {
        OverlapPolicy::Queue => MissedTickBehavior::Delay,
        OverlapPolicy::Allow | OverlapPolicy::Skip => MissedTickBehavior::Skip,
    });

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match overlap {
            OverlapPolicy::Queue => {
                let _turn = shared.queue.lock().await;
                if cancel.is_cancelled() {
                    break;
                }
                let _slot = InFlight::enter(&shared.in_flight);
                shared.run_tick().await;
            }
            OverlapPolicy::Skip if shared.in_flight.load(Ordering::SeqCst) > 0 => {
                warn!("previous tick still running, skipping this one");
            }
            OverlapPolicy::Allow | OverlapPolicy::Skip => {
                let shared = Arc::clone(&shared);
                // Reserve the in-flight slot before spawning so the next
                // Skip check cannot race the task's start.
                shared.in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _slot = InFlight::adopt(&shared.in_flight);
                    shared.run_tick().await;
                });
            }
        }
    }
    debug!("timer loop exited");
}
