// Shared test doubles: an in-memory container standing in for the host's
// DI scope provider, a few job types, and a notification recorder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_scheduler::{BoxError, Job, JobType, Notifier, Scope, ScopeProvider};

type Factory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

#[derive(Default)]
pub struct FakeContainer {
    factories: Mutex<Vec<(JobType, Factory)>>,
    create_calls: AtomicUsize,
    fail_create_on: Mutex<Option<usize>>,
    closed: Arc<AtomicUsize>,
}

impl FakeContainer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register<J, F>(&self, factory: F)
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Box<dyn Job>);
        self.factories.lock().unwrap().push((JobType::of::<J>(), factory));
    }

    pub fn unregister<J: Job>(&self) {
        let job_type = JobType::of::<J>();
        self.factories.lock().unwrap().retain(|(t, _)| *t != job_type);
    }

    /// Make the `call`-th `create_scope` invocation (1-based) fail.
    pub fn fail_create_on(&self, call: usize) {
        *self.fail_create_on.lock().unwrap() = Some(call);
    }

    pub fn scopes_created(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn scopes_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ScopeProvider for FakeContainer {
    fn create_scope(&self) -> Result<Box<dyn Scope>, BoxError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_create_on.lock().unwrap() == Some(call) {
            return Err("container unavailable".into());
        }
        Ok(Box::new(FakeScope {
            factories: self.factories.lock().unwrap().clone(),
            closed: Arc::clone(&self.closed),
            is_closed: false,
        }))
    }
}

pub struct FakeScope {
    factories: Vec<(JobType, Factory)>,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl Scope for FakeScope {
    fn resolve(&self, job_type: &JobType) -> Result<Box<dyn Job>, BoxError> {
        self.factories
            .iter()
            .find(|(t, _)| t == job_type)
            .map(|(_, factory)| factory())
            .ok_or_else(|| format!("{job_type} is not registered").into())
    }

    fn resolve_all(&self) -> Result<Vec<Box<dyn Job>>, BoxError> {
        Ok(self.factories.iter().map(|(_, factory)| factory()).collect())
    }

    fn close(&mut self) {
        assert!(!self.is_closed, "scope closed twice");
        self.is_closed = true;
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self as &dyn std::any::Any)
    }
}

/// Counts instances created, runs completed and the peak number of
/// concurrent runs for one job type.
#[derive(Default)]
pub struct Tracker {
    pub instances: AtomicUsize,
    pub runs: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Succeeds(pub Arc<Tracker>);

impl Job for Succeeds {
    fn execute(&self) -> Result<(), BoxError> {
        self.0.enter();
        self.0.exit();
        Ok(())
    }
}

pub struct Fails;

impl Job for Fails {
    fn execute(&self) -> Result<(), BoxError> {
        Err("boom".into())
    }
}

pub struct Panics;

impl Job for Panics {
    fn execute(&self) -> Result<(), BoxError> {
        panic!("index out of range")
    }
}

/// Sleeps on the worker; `N` only makes each instantiation a distinct job type.
pub struct Sleeper<const N: usize> {
    pub tracker: Arc<Tracker>,
    pub duration: Duration,
}

impl<const N: usize> Job for Sleeper<N> {
    fn execute(&self) -> Result<(), BoxError> {
        self.tracker.enter();
        std::thread::sleep(self.duration);
        self.tracker.exit();
        Ok(())
    }
}

/// Registers a job whose factory counts instances on `tracker`.
pub fn register_succeeds(container: &FakeContainer, tracker: &Arc<Tracker>) {
    let tracker = Arc::clone(tracker);
    container.register(move || {
        tracker.instances.fetch_add(1, Ordering::SeqCst);
        Succeeds(Arc::clone(&tracker))
    });
}

pub fn register_sleeper<const N: usize>(
    container: &FakeContainer,
    tracker: &Arc<Tracker>,
    duration: Duration,
) {
    let tracker = Arc::clone(tracker);
    container.register(move || {
        tracker.instances.fetch_add(1, Ordering::SeqCst);
        Sleeper::<N> { tracker: Arc::clone(&tracker), duration }
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Created { job: String },
    Closing { job: String, succeeded: bool, error: Option<String> },
    Failed { job: Option<String>, job_type: String, stage: String, message: String },
}

impl Seen {
    pub fn is_created(&self) -> bool {
        matches!(self, Seen::Created { .. })
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, Seen::Closing { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Seen::Failed { .. })
    }
}

/// Subscribe to all three points and collect what fires.
pub fn record(notifier: &Notifier) -> Arc<Mutex<Vec<Seen>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    notifier.on_scope_created("recorder", move |ev| {
        assert!(ev.scope.as_any().is_some_and(|s| s.is::<FakeScope>()));
        sink.lock().unwrap().push(Seen::Created { job: ev.job_type.to_string() });
        Ok(())
    });

    let sink = Arc::clone(&seen);
    notifier.on_scope_closing("recorder", move |ev| {
        assert_eq!(ev.succeeded, ev.error.is_none());
        sink.lock().unwrap().push(Seen::Closing {
            job: ev.job_type.to_string(),
            succeeded: ev.succeeded,
            error: ev.error.map(|e| e.to_string()),
        });
        Ok(())
    });

    let sink = Arc::clone(&seen);
    notifier.on_job_failed("recorder", move |ev| {
        sink.lock().unwrap().push(Seen::Failed {
            job: ev.job.map(|j| j.name().to_string()),
            job_type: ev.failure.job_type().to_string(),
            stage: ev.failure.stage().to_string(),
            message: ev.failure.error().to_string(),
        });
        Ok(())
    });

    seen
}

pub fn count(seen: &Mutex<Vec<Seen>>, pred: fn(&Seen) -> bool) -> usize {
    seen.lock().unwrap().iter().filter(|s| pred(s)).count()
}
