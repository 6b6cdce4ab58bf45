use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cadence_scheduler::{BoxError, Job};
use chrono::Utc;
use tracing::info;

/// Logs a line per tick so operators can see the runner is alive.
///
/// A new instance is built every tick; the beat counter lives outside the
/// job and is shared through the factory.
pub struct Heartbeat {
    beats: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new(beats: Arc<AtomicU64>) -> Self {
        Self { beats }
    }
}

impl Job for Heartbeat {
    fn execute(&self) -> Result<(), BoxError> {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        info!(beat, at = %Utc::now().to_rfc3339(), "heartbeat");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_accumulate_across_instances() {
        let beats = Arc::new(AtomicU64::new(0));
        Heartbeat::new(Arc::clone(&beats)).execute().unwrap();
        Heartbeat::new(Arc::clone(&beats)).execute().unwrap();
        assert_eq!(beats.load(Ordering::Relaxed), 2);
        assert_eq!(Heartbeat::new(beats).name(), "Heartbeat");
    }
}
