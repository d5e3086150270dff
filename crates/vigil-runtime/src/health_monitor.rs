//! [`HealthMonitor`] – the periodic sampling loop that drives the kernel.
//!
//! Each tick runs, in order:
//!
//! 1. **Sample** – read every metric independently; a failed read leaves
//!    that field empty and skips only its check.
//! 2. **I/O latency** – above the limit → WARNING alert.
//! 3. **Load** – above the limit → [`TaskScheduler::rebalance`].
//! 4. **Voltage** – outside the safe range → CRITICAL alert.
//! 5. **Memory** – strictly below the threshold →
//!    [`MemoryPressureController::on_memory_pressure`].
//! 6. **Faults** – pending driver faults go to
//!    [`CriticalFaultController::handle_critical_error`].
//! 7. **Publish** – the snapshot goes out on the `Telemetry` topic.
//!
//! The boot-time KPI is evaluated once, by [`HealthMonitor::check_boot_kpi`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn};
use vigil_hal::MetricsSource;
use vigil_kernel::{
    AlertDispatcher, Breach, CriticalFaultController, EvictionOutcome, FaultOutcome,
    MemoryPressureController, TaskScheduler, Thresholds,
};
use vigil_middleware::{EventBus, Topic};
use vigil_types::{Event, EventPayload, HealthSnapshot, KernelError, Metric};

use crate::report::HealthReport;

const SOURCE: &str = "vigil-runtime::health_monitor";

/// Default sampling period.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// What one tick observed and did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: HealthSnapshot,
    pub breaches: Vec<Breach>,
    /// Tasks demoted by the rebalance, if one ran.
    pub demoted: usize,
    pub eviction: Option<EvictionOutcome>,
    pub faults: Vec<FaultOutcome>,
}

pub struct HealthMonitor {
    metrics: Arc<dyn MetricsSource>,
    thresholds: Thresholds,
    scheduler: Arc<TaskScheduler>,
    alerts: Arc<AlertDispatcher>,
    memory: Arc<MemoryPressureController>,
    faults: Arc<CriticalFaultController>,
    bus: Option<EventBus>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        thresholds: Thresholds,
        scheduler: Arc<TaskScheduler>,
        alerts: Arc<AlertDispatcher>,
        memory: Arc<MemoryPressureController>,
        faults: Arc<CriticalFaultController>,
    ) -> Self {
        Self {
            metrics,
            thresholds,
            scheduler,
            alerts,
            memory,
            faults,
            bus: None,
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Read every metric once.
    pub fn sample(&self) -> HealthSnapshot {
        HealthSnapshot {
            boot_time_ms: reading(Metric::BootTime, self.metrics.boot_time_ms()),
            load_average: reading(Metric::LoadAverage, self.metrics.load_average()),
            io_latency_ms: reading(Metric::IoLatency, self.metrics.io_latency_ms()),
            free_memory_kb: reading(Metric::FreeMemory, self.metrics.free_memory_kb()),
            voltage_v: reading(Metric::Voltage, self.metrics.voltage_v()),
            ..HealthSnapshot::empty()
        }
    }

    /// Run one sample-evaluate-react cycle.
    pub fn tick(&self) -> TickReport {
        let _span = info_span!("health_tick").entered();
        let snapshot = self.sample();
        let mut report = TickReport {
            snapshot: snapshot.clone(),
            breaches: Vec::new(),
            demoted: 0,
            eviction: None,
            faults: Vec::new(),
        };

        if let Some(breach) = snapshot
            .io_latency_ms
            .and_then(|ms| self.thresholds.check_io_latency(ms))
        {
            self.alerts.warning("High I/O latency", breach.to_string());
            report.breaches.push(breach);
        }

        if let Some(load) = snapshot.load_average {
            if let Some(breach) = self.thresholds.check_load(load) {
                report.demoted = self.scheduler.rebalance(load);
                info!(%breach, demoted = report.demoted, "load above limit; scheduler rebalanced");
                report.breaches.push(breach);
            }
        }

        if let Some(breach) = snapshot
            .voltage_v
            .and_then(|v| self.thresholds.check_voltage(v))
        {
            self.alerts.critical("Voltage failure", breach.to_string());
            report.breaches.push(breach);
        }

        if let Some(free_kb) = snapshot.free_memory_kb {
            if let Some(breach) = self.thresholds.check_memory(free_kb) {
                report.eviction = Some(
                    self.memory
                        .on_memory_pressure(free_kb, self.thresholds.critical_free_memory_kb),
                );
                report.breaches.push(breach);
            }
        }

        for event in self.metrics.drain_faults() {
            report.faults.push(self.faults.handle_critical_error(event));
        }

        if let Some(bus) = &self.bus {
            bus.emit(
                Topic::Telemetry,
                Event::new(SOURCE, EventPayload::Telemetry(snapshot)),
            );
        }

        debug!(breaches = report.breaches.len(), "health tick complete");
        report
    }

    /// One-shot boot KPI check.  Raises a WARNING when boot was too slow.
    pub fn check_boot_kpi(&self) -> Option<Breach> {
        let boot_ms = reading(Metric::BootTime, self.metrics.boot_time_ms())?;
        let breach = self.thresholds.check_boot_time(boot_ms)?;
        self.alerts.warning("Slow boot", breach.to_string());
        Some(breach)
    }

    /// Sample once and summarise.
    pub fn report(&self) -> HealthReport {
        HealthReport {
            snapshot: self.sample(),
            active_tasks: self.scheduler.active_count(),
            fault_state: self.faults.state(),
        }
    }

    /// Tick every interval until `stop` turns `true` or its sender is dropped.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("health monitor stopped");
    }
}

fn reading<T>(metric: Metric, result: Result<T, KernelError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%metric, error = %e, "metric read failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::{JournalEntry, SimRig};
    use vigil_kernel::TaskSpec;
    use vigil_types::{AlertLevel, FaultCode, FaultEvent, FaultState, Priority, TaskState};

    struct Fixture {
        rig: SimRig,
        scheduler: Arc<TaskScheduler>,
        monitor: HealthMonitor,
    }

    fn fixture() -> Fixture {
        let rig = SimRig::new();
        let thresholds = Thresholds::default();
        let scheduler = Arc::new(TaskScheduler::new(
            rig.executor.clone(),
            thresholds.max_load_average,
        ));
        let alerts = Arc::new(AlertDispatcher::new(rig.alerts.clone()));
        let memory = Arc::new(MemoryPressureController::new(
            scheduler.clone(),
            alerts.clone(),
        ));
        let faults = Arc::new(CriticalFaultController::new(
            scheduler.clone(),
            rig.power.clone(),
            rig.metrics.clone(),
            alerts.clone(),
        ));
        let monitor = HealthMonitor::new(
            rig.metrics.clone(),
            thresholds,
            scheduler.clone(),
            alerts,
            memory,
            faults,
        );
        Fixture {
            rig,
            scheduler,
            monitor,
        }
    }

    #[test]
    fn healthy_tick_does_nothing() {
        let f = fixture();
        let report = f.monitor.tick();
        assert!(report.breaches.is_empty());
        assert!(report.eviction.is_none());
        assert!(f.rig.journal.entries().is_empty());
    }

    #[test]
    fn low_voltage_raises_exactly_one_critical_alert() {
        let f = fixture();
        f.rig.metrics.set_voltage_v(12.0);
        f.monitor.tick();

        let critical = f.rig.alerts.at_level(AlertLevel::Critical);
        assert_eq!(critical.len(), 1);
        assert!(critical[0].detail.contains("12"), "{}", critical[0].detail);
        assert!(critical[0].detail.contains("[15V, 19V]"), "{}", critical[0].detail);
        assert_eq!(f.rig.alerts.alerts().len(), 1);
    }

    #[test]
    fn slow_io_warns() {
        let f = fixture();
        f.rig.metrics.set_io_latency_ms(8);
        let report = f.monitor.tick();
        assert!(matches!(report.breaches[..], [Breach::IoLatency { observed_ms: 8, .. }]));
        assert_eq!(f.rig.alerts.at_level(AlertLevel::Warning).len(), 1);
    }

    #[test]
    fn high_load_rebalances_without_alerting() {
        let f = fixture();
        let handle = f.scheduler.submit(TaskSpec::new("render", || {})).unwrap();
        f.rig.metrics.set_load_average(3.2);

        let report = f.monitor.tick();

        assert_eq!(report.demoted, 1);
        assert_eq!(handle.priority(), Some(Priority::Background));
        assert!(f.rig.alerts.alerts().is_empty());
    }

    #[test]
    fn memory_pressure_triggers_eviction() {
        let f = fixture();
        let victim = f
            .scheduler
            .submit(
                TaskSpec::new("cache", || {})
                    .priority(Priority::Idle)
                    .memory_kb(512_000),
            )
            .unwrap();
        f.rig.metrics.set_free_memory_kb(100_000);

        let report = f.monitor.tick();

        assert!(matches!(report.eviction, Some(EvictionOutcome::Evicted { .. })));
        assert_eq!(victim.status(), Some(TaskState::Evicted));
    }

    #[test]
    fn memory_exactly_at_threshold_is_left_alone() {
        let f = fixture();
        f.rig.metrics.set_free_memory_kb(262_144);
        assert!(f.monitor.tick().eviction.is_none());
    }

    #[test]
    fn failed_read_skips_only_that_metric() {
        let f = fixture();
        f.rig.metrics.fail(Metric::Voltage);
        f.rig.metrics.set_io_latency_ms(5);

        let report = f.monitor.tick();

        assert!(report.snapshot.voltage_v.is_none());
        assert!(report.snapshot.io_latency_ms.is_some());
        assert_eq!(report.breaches.len(), 1);
        assert!(f.rig.alerts.at_level(AlertLevel::Critical).is_empty());
    }

    #[test]
    fn independent_breaches_all_fire_in_one_tick() {
        let f = fixture();
        f.rig.metrics.set_io_latency_ms(5);
        f.rig.metrics.set_voltage_v(21.0);
        f.rig.metrics.set_free_memory_kb(1);

        let report = f.monitor.tick();

        assert_eq!(report.breaches.len(), 3);
        assert_eq!(f.rig.alerts.at_level(AlertLevel::Warning).len(), 1);
        // Voltage, plus the no-candidate eviction failure.
        assert_eq!(f.rig.alerts.at_level(AlertLevel::Critical).len(), 2);
    }

    #[test]
    fn pending_faults_reach_the_fault_controller() {
        let f = fixture();
        f.rig
            .metrics
            .inject_fault(FaultEvent::new(FaultCode::BmsFailure, "bms timeout"));

        let report = f.monitor.tick();

        assert_eq!(report.faults.len(), 1);
        assert_eq!(f.rig.power.shutdown_calls(), vec![0]);
        assert_eq!(f.monitor.report().fault_state, FaultState::Halted);
        assert!(f.monitor.tick().faults.is_empty());
    }

    #[test]
    fn boot_kpi_is_checked_on_demand() {
        let f = fixture();
        assert!(f.monitor.check_boot_kpi().is_none());
        f.rig.metrics.set_boot_time_ms(21_000);
        assert!(matches!(
            f.monitor.check_boot_kpi(),
            Some(Breach::BootTime {
                observed_ms: 21_000,
                ..
            })
        ));
        assert!(f.rig.journal.entries().contains(&JournalEntry::Alert {
            level: AlertLevel::Warning,
            title: "Slow boot".to_string()
        }));
    }

    #[tokio::test]
    async fn snapshots_are_published_on_telemetry_topic()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Telemetry);
        let Fixture { rig, monitor, .. } = fixture();
        let monitor = monitor.with_bus(bus);
        rig.metrics.set_load_average(1.25);

        monitor.tick();

        match rx.recv().await?.payload {
            EventPayload::Telemetry(snapshot) => assert_eq!(snapshot.load_average, Some(1.25)),
            other => panic!("unexpected payload: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn run_ticks_until_stopped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Telemetry);
        let Fixture { monitor, .. } = fixture();
        let monitor = Arc::new(
            monitor
                .with_bus(bus)
                .with_interval(Duration::from_millis(100)),
        );
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.run(stop_rx).await })
        };

        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        stop_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
