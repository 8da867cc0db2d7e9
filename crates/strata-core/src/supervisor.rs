//! Keeps desired-running containers running.
//!
//! Every cycle reads the containers whose desired state is `Running` and
//! starts the ones the runtime reports otherwise. A container that cannot be
//! started after the configured retries is recorded as `Stopped`, so later
//! cycles leave it alone until an operator marks it running again.

use crate::config::SupervisorConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_runtime::{ContainerRecord, ContainerRuntime, DesiredState, StateStore};
use tracing::{debug, info, warn};

/// Granularity at which `run` notices a shutdown request while idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Desired-running records seen.
    pub checked: usize,
    /// Containers that were down and got started.
    pub started: usize,
    /// Records downgraded to `Stopped` after every start attempt failed.
    pub downgraded: usize,
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

pub struct StateSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    states: Arc<dyn StateStore>,
    config: SupervisorConfig,
    sleep: Sleeper,
}

impl StateSupervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        states: Arc<dyn StateStore>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            runtime,
            states,
            config,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the function used for retry delays and cycle intervals.
    #[must_use]
    pub fn with_sleeper(mut self, sleep: Sleeper) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn run_cycle(&self) -> CycleReport {
        let records = match self.states.find_by_state(DesiredState::Running) {
            Ok(records) => records,
            Err(e) => {
                warn!("reading desired container states: {e}");
                Vec::new()
            }
        };

        let mut report = CycleReport {
            checked: records.len(),
            ..CycleReport::default()
        };
        for record in records {
            if self.runtime.is_running(&record.name) {
                continue;
            }
            if self.start_with_retries(&record.name) {
                report.started += 1;
            } else {
                self.downgrade(record);
                report.downgraded += 1;
            }
        }
        debug!(
            "supervisor cycle: {} checked, {} started, {} downgraded",
            report.checked, report.started, report.downgraded
        );
        report
    }

    fn start_with_retries(&self, name: &str) -> bool {
        info!("starting {name}");
        let mut last = match self.runtime.start(name) {
            Ok(()) => return true,
            Err(e) => e,
        };
        for retry in 0..self.config.start_retries {
            let delay = self.config.retry_delay(retry);
            debug!("start of {name} failed ({last}), retrying in {delay:?}");
            (self.sleep)(delay);
            match self.runtime.start(name) {
                Ok(()) => return true,
                Err(e) => last = e,
            }
        }
        warn!("failed to start {name}: {last}");
        false
    }

    fn downgrade(&self, record: ContainerRecord) {
        let name = record.name.clone();
        match self.states.save(&record.with_state(DesiredState::Stopped)) {
            Ok(()) => warn!("{name} marked as stopped after repeated start failures"),
            Err(e) => warn!("recording {name} as stopped: {e}"),
        }
    }

    /// Run cycles until `shutdown` is set. Returns the number of cycles run.
    pub fn run(&self, shutdown: &AtomicBool) -> u64 {
        let mut cycles = 0;
        info!(
            "supervising containers every {}s",
            self.config.interval_secs
        );
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle();
            cycles += 1;

            let mut remaining = self.config.interval();
            while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
                let slice = remaining.min(SHUTDOWN_POLL);
                (self.sleep)(slice);
                remaining -= slice;
            }
        }
        info!("supervisor stopped after {cycles} cycles");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use strata_runtime::{ContainerState, MemoryStateStore, MockRuntime};

    fn supervisor(
        runtime: &Arc<MockRuntime>,
        states: &Arc<MemoryStateStore>,
        delays: &Arc<Mutex<Vec<Duration>>>,
    ) -> StateSupervisor {
        let recorded = Arc::clone(delays);
        StateSupervisor::new(
            Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
            Arc::clone(states) as Arc<dyn StateStore>,
            SupervisorConfig::default(),
        )
        .with_sleeper(Box::new(move |d| recorded.lock().unwrap().push(d)))
    }

    fn running(states: &MemoryStateStore, name: &str) {
        states
            .save(&ContainerRecord::new(name, DesiredState::Running))
            .unwrap();
    }

    #[test]
    fn starts_stopped_containers() {
        let runtime = Arc::new(MockRuntime::new());
        let states = Arc::new(MemoryStateStore::new());
        let delays = Arc::new(Mutex::new(Vec::new()));
        running(&states, "web1");
        running(&states, "db");
        runtime.set_state("db", ContainerState::Running);

        let report = supervisor(&runtime, &states, &delays).run_cycle();
        assert_eq!(
            report,
            CycleReport {
                checked: 2,
                started: 1,
                downgraded: 0
            }
        );
        assert!(runtime.is_running("web1"));
        assert_eq!(runtime.start_attempts("db"), 0);
    }

    #[test]
    fn retries_with_growing_delays_then_downgrades_once() {
        let runtime = Arc::new(MockRuntime::new());
        let states = Arc::new(MemoryStateStore::new());
        let delays = Arc::new(Mutex::new(Vec::new()));
        running(&states, "web1");
        runtime.fail_starts("web1", 6);
        let saves_before = states.save_count();

        let report = supervisor(&runtime, &states, &delays).run_cycle();
        assert_eq!(report.downgraded, 1);
        assert_eq!(runtime.start_attempts("web1"), 6);
        assert_eq!(
            *delays.lock().unwrap(),
            (5..10).map(Duration::from_secs).collect::<Vec<_>>()
        );
        assert_eq!(states.save_count(), saves_before + 1);
        assert_eq!(
            states.find("web1").unwrap().unwrap().state,
            DesiredState::Stopped
        );
    }

    #[test]
    fn recovers_on_a_late_retry() {
        let runtime = Arc::new(MockRuntime::new());
        let states = Arc::new(MemoryStateStore::new());
        let delays = Arc::new(Mutex::new(Vec::new()));
        running(&states, "web1");
        runtime.fail_starts("web1", 3);

        let report = supervisor(&runtime, &states, &delays).run_cycle();
        assert_eq!(report.started, 1);
        assert_eq!(report.downgraded, 0);
        assert_eq!(delays.lock().unwrap().len(), 3);
        assert_eq!(
            states.find("web1").unwrap().unwrap().state,
            DesiredState::Running
        );
    }

    #[test]
    fn unreadable_state_store_is_an_empty_cycle() {
        let runtime = Arc::new(MockRuntime::new());
        let states = Arc::new(MemoryStateStore::new());
        let delays = Arc::new(Mutex::new(Vec::new()));
        running(&states, "web1");
        states.set_fail_find(true);

        let report = supervisor(&runtime, &states, &delays).run_cycle();
        assert_eq!(report, CycleReport::default());
        assert!(runtime.calls().is_empty());
    }

    #[test]
    fn run_stops_when_shutdown_is_requested() {
        let runtime = Arc::new(MockRuntime::new());
        let states = Arc::new(MemoryStateStore::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let sup = StateSupervisor::new(
            runtime as Arc<dyn ContainerRuntime>,
            states as Arc<dyn StateStore>,
            SupervisorConfig::default(),
        )
        .with_sleeper(Box::new(move |_| flag.store(true, Ordering::SeqCst)));

        assert_eq!(sup.run(&shutdown), 1);
    }
}
