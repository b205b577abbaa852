//! Fixed-interval scheduler for unattended syncs.
//!
//! A cycle runs immediately on start and then on every tick. Services in a
//! cycle run one at a time and a failing service never stops the others.
//! Shutdown is cooperative: the token is checked between services and between
//! ticks, so an in-flight import always finishes and leaves its sync state
//! consistent.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cadence;
use crate::error::SyncError;
use crate::sync::{parse_service_list, SyncEngine, SyncReport, SyncService};

/// Shortest interval the daemon accepts. Provider quotas are per minute;
/// anything tighter mostly burns them on empty incremental fetches.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_INTERVAL: &str = "15m";

/// What the daemon drives. Implemented by [`SyncEngine`]; tests supply fakes.
#[async_trait(?Send)]
pub trait ServiceRunner {
    /// Run one service incrementally.
    async fn run_scheduled(&self, service: SyncService) -> Result<SyncReport, SyncError>;

    /// Housekeeping after every cycle.
    async fn after_cycle(&self) {}
}

#[async_trait(?Send)]
impl ServiceRunner for SyncEngine {
    async fn run_scheduled(&self, service: SyncService) -> Result<SyncReport, SyncError> {
        self.run_service(service, false).await
    }

    /// Priority scores drift with time even without new interactions.
    async fn after_cycle(&self) {
        match cadence::refresh_all(self.db(), self.config().now()) {
            Ok(0) => {}
            Ok(changed) => log::info!("daemon: refreshed {} follow-up scores", changed),
            Err(e) => log::warn!("daemon: failed to refresh follow-up scores: {}", e),
        }
    }
}

/// Outcome of one pass over the configured services.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: Vec<SyncService>,
    pub failed: Vec<SyncService>,
    /// Shutdown was requested before every service had run.
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct SyncDaemon {
    interval: Duration,
    services: Vec<SyncService>,
}

impl SyncDaemon {
    pub fn new(interval: Duration, mut services: Vec<SyncService>) -> Result<Self, SyncError> {
        if interval < MIN_INTERVAL {
            return Err(SyncError::IntervalTooShort(interval, MIN_INTERVAL));
        }
        services.sort();
        services.dedup();
        if services.is_empty() {
            return Err(SyncError::NoServices);
        }
        Ok(Self { interval, services })
    }

    /// Build from CLI strings: a humantime interval (`15m`, `1h`) and a
    /// service list (`calendar,gmail` or `all`).
    pub fn from_args(interval: &str, services: &str) -> Result<Self, SyncError> {
        let parsed = humantime::parse_duration(interval.trim()).map_err(|e| {
            SyncError::Configuration(format!("invalid interval '{}': {}", interval, e))
        })?;
        Self::new(parsed, parse_service_list(services)?)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn services(&self) -> &[SyncService] {
        &self.services
    }

    /// Run cycles until `cancel` fires.
    pub async fn run<R>(&self, runner: &R, cancel: CancellationToken) -> Result<(), SyncError>
    where
        R: ServiceRunner + ?Sized,
    {
        let names: Vec<&str> = self.services.iter().map(|s| s.as_str()).collect();
        log::info!(
            "daemon: started, every {} for {}",
            humantime::format_duration(self.interval),
            names.join(", ")
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            cycles += 1;
            let started = Instant::now();
            let summary = self.run_cycle(runner, &cancel).await;
            log::info!(
                "daemon: cycle {} finished in {:.1?}: {} succeeded, {} failed{}",
                cycles,
                started.elapsed(),
                summary.succeeded.len(),
                summary.failed.len(),
                if summary.interrupted { " (interrupted)" } else { "" }
            );

            if cancel.is_cancelled() {
                break;
            }
        }

        log::info!("daemon: stopped after {} cycles", cycles);
        Ok(())
    }

    /// One pass over the services. Failures are logged and counted.
    pub async fn run_cycle<R>(&self, runner: &R, cancel: &CancellationToken) -> CycleSummary
    where
        R: ServiceRunner + ?Sized,
    {
        let mut summary = CycleSummary::default();
        for &service in &self.services {
            if cancel.is_cancelled() {
                log::info!("daemon: shutdown requested, skipping {} and later services", service);
                summary.interrupted = true;
                break;
            }

            let started = Instant::now();
            match runner.run_scheduled(service).await {
                Ok(report) => {
                    log::info!("daemon: {} ok in {:.1?}: {}", service, started.elapsed(), report.summary());
                    summary.succeeded.push(service);
                }
                Err(e) => {
                    log::error!("daemon: {} failed in {:.1?}: {}", service, started.elapsed(), e);
                    if e.requires_user_action() {
                        log::error!("daemon: {}", e.recovery_suggestion());
                    }
                    summary.failed.push(service);
                }
            }
        }
        runner.after_cycle().await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::sync::FetchMode;

    /// Records calls; fails `fail_on`; cancels the token after `cancel_after` calls.
    struct FakeRunner {
        calls: RefCell<Vec<SyncService>>,
        cycles: Cell<usize>,
        fail_on: Option<SyncService>,
        cancel_after: Option<usize>,
        cancel: CancellationToken,
    }

    impl FakeRunner {
        fn new(cancel: &CancellationToken) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                cycles: Cell::new(0),
                fail_on: None,
                cancel_after: None,
                cancel: cancel.clone(),
            }
        }
    }

    #[async_trait(?Send)]
    impl ServiceRunner for FakeRunner {
        async fn run_scheduled(&self, service: SyncService) -> Result<SyncReport, SyncError> {
            self.calls.borrow_mut().push(service);
            if self.cancel_after == Some(self.calls.borrow().len()) {
                self.cancel.cancel();
            }
            if self.fail_on == Some(service) {
                return Err(SyncError::Provider("HTTP 503".to_string()));
            }
            Ok(SyncReport::new(service, FetchMode::Incremental))
        }

        async fn after_cycle(&self) {
            self.cycles.set(self.cycles.get() + 1);
        }
    }

    #[test]
    fn test_interval_floor() {
        let all = SyncService::ALL.to_vec();
        assert!(matches!(
            SyncDaemon::new(Duration::from_secs(4 * 60), all.clone()),
            Err(SyncError::IntervalTooShort(..))
        ));
        assert!(SyncDaemon::new(Duration::from_secs(5 * 60), all).is_ok());

        assert!(matches!(
            SyncDaemon::from_args("4m", "all"),
            Err(SyncError::IntervalTooShort(..))
        ));
        assert!(matches!(
            SyncDaemon::from_args("soon", "all"),
            Err(SyncError::Configuration(_))
        ));
        assert!(matches!(
            SyncDaemon::new(MIN_INTERVAL, vec![]),
            Err(SyncError::NoServices)
        ));
    }

    #[test]
    fn test_services_parsed_in_canonical_order() {
        let daemon = SyncDaemon::from_args("15m", "gmail,contacts,gmail").unwrap();
        assert_eq!(daemon.interval(), Duration::from_secs(15 * 60));
        assert_eq!(
            daemon.services(),
            &[SyncService::Contacts, SyncService::Gmail]
        );
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately() {
        let cancel = CancellationToken::new();
        let mut runner = FakeRunner::new(&cancel);
        runner.cancel_after = Some(3);
        let daemon = SyncDaemon::new(MIN_INTERVAL, SyncService::ALL.to_vec()).unwrap();

        // Would block for five minutes if the first cycle waited for a tick.
        tokio::time::timeout(Duration::from_secs(5), daemon.run(&runner, cancel.clone()))
            .await
            .expect("first cycle should not wait for the interval")
            .unwrap();

        assert_eq!(*runner.calls.borrow(), SyncService::ALL.to_vec());
        assert_eq!(runner.cycles.get(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_service_only() {
        let cancel = CancellationToken::new();
        let mut runner = FakeRunner::new(&cancel);
        runner.cancel_after = Some(1);
        let daemon = SyncDaemon::new(MIN_INTERVAL, SyncService::ALL.to_vec()).unwrap();

        daemon.run(&runner, cancel.clone()).await.unwrap();

        assert_eq!(*runner.calls.borrow(), vec![SyncService::Contacts]);
        assert_eq!(runner.cycles.get(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = FakeRunner::new(&cancel);
        let daemon = SyncDaemon::new(MIN_INTERVAL, SyncService::ALL.to_vec()).unwrap();

        daemon.run(&runner, cancel.clone()).await.unwrap();
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(runner.cycles.get(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_cycle() {
        let cancel = CancellationToken::new();
        let mut runner = FakeRunner::new(&cancel);
        runner.fail_on = Some(SyncService::Calendar);
        let daemon = SyncDaemon::new(MIN_INTERVAL, SyncService::ALL.to_vec()).unwrap();

        let summary = daemon.run_cycle(&runner, &cancel).await;
        assert_eq!(summary.succeeded, vec![SyncService::Contacts, SyncService::Gmail]);
        assert_eq!(summary.failed, vec![SyncService::Calendar]);
        assert!(!summary.interrupted);
    }
}
