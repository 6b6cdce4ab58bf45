//! `cadence-scheduler`: fixed-interval background job runner with
//! per-job isolated scopes.
//!
//! # Overview
//!
//! [`runner::JobRunner::start`] opens one throwaway scope from the host's
//! [`provider::ScopeProvider`], resolves every registered [`job::Job`] to
//! learn their types, and arms a Tokio timer. Each tick then runs every job
//! type in parallel, each in a fresh scope with a freshly resolved instance.
//! One job failing never stops its siblings or later ticks.
//!
//! # Lifecycle of one job unit
//!
//! | Step            | Notification                      | On failure                     |
//! |-----------------|-----------------------------------|--------------------------------|
//! | create scope    | none                              | `job_failed` (no job), no close |
//! | resolve job     | none                              | `job_failed`, failed `scope_closing` |
//! | before execute  | `scope_created`                   | `job_failed`, failed `scope_closing` |
//! | execute         | none                              | `job_failed`, failed `scope_closing` |
//! | after execute   | successful `scope_closing`        | unit aborted                   |
//! | release         | scope `close()` runs exactly once |                                |

pub mod engine;
pub mod error;
pub mod job;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod types;

pub use cadence_core::{OverlapPolicy, SchedulerConfig};
pub use engine::ExecutionEngine;
pub use error::{BoxError, HandlerError, Result, SchedulerError};
pub use job::Job;
pub use notify::{JobFailed, Notifier, ScopeClosing, ScopeCreated, SubscriptionId};
pub use provider::{Scope, ScopeGuard, ScopeProvider};
pub use registry::JobRegistry;
pub use runner::JobRunner;
pub use types::{JobError, JobFailure, JobType, ScopeId, TickReport, UnitOutcome};
