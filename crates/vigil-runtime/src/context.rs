//! [`KernelSafetyContext`] – owns one of every safety component and their
//! lifecycle.
//!
//! ```text
//!              ┌──────────────── KernelSafetyContext ────────────────┐
//!  metrics ───►│ HealthMonitor ──► TaskScheduler ◄── MemoryPressure  │
//!              │      │                  ▲                           │
//!              │      └──► CriticalFaultController ──► PowerControl ─┼──► power
//!              │                 AlertDispatcher ───────────────────┼──► alerts
//!              └──────────────────────── EventBus ──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use vigil_hal::SimRig;
//! use vigil_runtime::{Collaborators, KernelSafetyContext, SafetyConfig};
//!
//! # async fn demo() -> Result<(), vigil_types::KernelError> {
//! let rig = SimRig::new();
//! let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));
//! ctx.start()?;
//! // ... the health loop now ticks once per second ...
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vigil_hal::{AlertChannel, MetricsSource, PowerControl, SimRig, TaskExecutor};
use vigil_kernel::alerting::DEFAULT_LATENCY_BUDGET;
use vigil_kernel::{
    AlertDispatcher, CriticalFaultController, FaultOutcome, MemoryPressureController,
    TaskHandle, TaskScheduler, TaskSpec, Thresholds,
};
use vigil_middleware::{BusAlertChannel, EventBus};
use vigil_types::{FaultCode, FaultEvent, FaultState, KernelError, Metric};

use crate::health_monitor::{DEFAULT_SAMPLE_INTERVAL, HealthMonitor};
use crate::report::HealthReport;

/// Delay used when the boot preflight finds the supply out of range.
const PREFLIGHT_SHUTDOWN_DELAY_SECS: u32 = 1;

/// Runtime settings, fixed for the life of a context.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyConfig {
    pub thresholds: Thresholds,
    pub sample_interval: Duration,
    pub alert_latency_budget: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            alert_latency_budget: DEFAULT_LATENCY_BUDGET,
        }
    }
}

/// The external collaborators a context is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub metrics: Arc<dyn MetricsSource>,
    pub power: Arc<dyn PowerControl>,
    pub executor: Arc<dyn TaskExecutor>,
    /// Primary alert channel.  `None` publishes alerts on the event bus.
    pub alerts: Option<Arc<dyn AlertChannel>>,
}

impl Collaborators {
    /// Wire every collaborator to the fakes in `rig`.
    pub fn from_sim(rig: &SimRig) -> Self {
        Self {
            metrics: rig.metrics.clone(),
            power: rig.power.clone(),
            executor: rig.executor.clone(),
            alerts: Some(rig.alerts.clone()),
        }
    }
}

struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct KernelSafetyContext {
    config: SafetyConfig,
    bus: EventBus,
    metrics: Arc<dyn MetricsSource>,
    power: Arc<dyn PowerControl>,
    alerts: Arc<AlertDispatcher>,
    scheduler: Arc<TaskScheduler>,
    memory: Arc<MemoryPressureController>,
    faults: Arc<CriticalFaultController>,
    monitor: Arc<HealthMonitor>,
    running: Mutex<Option<LoopHandle>>,
}

impl KernelSafetyContext {
    /// Build every component.  Nothing runs until [`start`][Self::start].
    pub fn new(config: SafetyConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            metrics,
            power,
            executor,
            alerts,
        } = collaborators;
        let bus = EventBus::default();

        let primary: Arc<dyn AlertChannel> =
            alerts.unwrap_or_else(|| Arc::new(BusAlertChannel::new(bus.clone())));
        let alerts = Arc::new(
            AlertDispatcher::new(primary).with_latency_budget(config.alert_latency_budget),
        );

        let scheduler = Arc::new(TaskScheduler::new(
            executor,
            config.thresholds.max_load_average,
        ));
        let memory = Arc::new(
            MemoryPressureController::new(scheduler.clone(), alerts.clone()).with_bus(bus.clone()),
        );
        let faults = Arc::new(
            CriticalFaultController::new(
                scheduler.clone(),
                power.clone(),
                metrics.clone(),
                alerts.clone(),
            )
            .with_bus(bus.clone()),
        );
        let monitor = Arc::new(
            HealthMonitor::new(
                metrics.clone(),
                config.thresholds.clone(),
                scheduler.clone(),
                alerts.clone(),
                memory.clone(),
                faults.clone(),
            )
            .with_bus(bus.clone())
            .with_interval(config.sample_interval),
        );

        Self {
            config,
            bus,
            metrics,
            power,
            alerts,
            scheduler,
            memory,
            faults,
            monitor,
            running: Mutex::new(None),
        }
    }

    /// Boot-time supply check.
    ///
    /// An out-of-range voltage raises a CRITICAL alert, requests an emergency
    /// shutdown and returns [`KernelError::PowerControl`].  An unreadable
    /// voltage is logged and tolerated.
    pub fn preflight(&self) -> Result<(), KernelError> {
        let voltage = match self.metrics.voltage_v() {
            Ok(v) => v,
            Err(e) => {
                warn!(metric = %Metric::Voltage, error = %e, "preflight: voltage unreadable; continuing");
                return Ok(());
            }
        };
        match self.config.thresholds.check_voltage(voltage) {
            None => {
                info!(voltage, "preflight: supply voltage nominal");
                Ok(())
            }
            Some(breach) => {
                error!(%breach, "preflight: supply voltage out of range");
                self.alerts.critical("Voltage failure", breach.to_string());
                self.power.emergency_shutdown(PREFLIGHT_SHUTDOWN_DELAY_SECS);
                Err(KernelError::PowerControl(breach.to_string()))
            }
        }
    }

    /// Run the preflight and the boot KPI check, then spawn the health loop on
    /// the current Tokio runtime.  Starting twice is a no-op.
    pub fn start(&self) -> Result<(), KernelError> {
        let mut running = self.running();
        if running.is_some() {
            warn!("safety context already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| KernelError::Channel(format!("no tokio runtime: {e}")))?;

        self.preflight()?;
        self.monitor.check_boot_kpi();

        let (stop, stop_rx) = watch::channel(false);
        let monitor = Arc::clone(&self.monitor);
        let task = runtime.spawn(async move { monitor.run(stop_rx).await });
        *running = Some(LoopHandle { stop, task });
        info!("safety context started");
        Ok(())
    }

    /// Stop the health loop and wait for it to finish.
    pub async fn shutdown(&self) {
        let Some(LoopHandle { stop, task }) = self.running().take() else {
            return;
        };
        let _ = stop.send(true);
        if let Err(e) = task.await {
            error!(error = %e, "health loop ended abnormally");
        }
        info!("safety context stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Admit a task through the scheduler.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, KernelError> {
        self.scheduler.submit(spec)
    }

    /// Hand a fault to the escalation machine.
    pub fn report_fault(&self, event: FaultEvent) -> FaultOutcome {
        self.faults.handle_critical_error(event)
    }

    /// [`report_fault`][Self::report_fault] for a raw driver code.
    pub fn report_raw_fault(&self, code: u32, detail: impl Into<String>) -> FaultOutcome {
        self.report_fault(FaultEvent::new(FaultCode::from_raw(code), detail))
    }

    pub fn report(&self) -> HealthReport {
        self.monitor.report()
    }

    pub fn fault_state(&self) -> FaultState {
        self.faults.state()
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn memory_controller(&self) -> &Arc<MemoryPressureController> {
        &self.memory
    }

    pub fn fault_controller(&self) -> &Arc<CriticalFaultController> {
        &self.faults
    }

    fn running(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::JournalEntry;
    use vigil_middleware::Topic;
    use vigil_types::{AlertLevel, EventPayload};

    fn fast_config() -> SafetyConfig {
        SafetyConfig {
            sample_interval: Duration::from_millis(20),
            ..SafetyConfig::default()
        }
    }

    #[test]
    fn preflight_passes_on_nominal_supply() {
        let rig = SimRig::new();
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));
        assert!(ctx.preflight().is_ok());
        assert!(rig.journal.entries().is_empty());
    }

    #[test]
    fn preflight_voltage_failure_shuts_down() {
        let rig = SimRig::new();
        rig.metrics.set_voltage_v(12.0);
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));

        assert!(matches!(ctx.preflight(), Err(KernelError::PowerControl(_))));
        assert_eq!(
            rig.journal.entries(),
            vec![
                JournalEntry::Alert {
                    level: AlertLevel::Critical,
                    title: "Voltage failure".to_string()
                },
                JournalEntry::Shutdown(1),
            ]
        );
    }

    #[test]
    fn preflight_tolerates_unreadable_voltage() {
        let rig = SimRig::new();
        rig.metrics.fail(Metric::Voltage);
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));
        assert!(ctx.preflight().is_ok());
    }

    #[test]
    fn start_outside_a_runtime_is_an_error() {
        let rig = SimRig::new();
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));
        assert!(matches!(ctx.start(), Err(KernelError::Channel(_))));
        assert!(!ctx.is_running());
    }

    #[tokio::test]
    async fn start_refuses_bad_supply() {
        let rig = SimRig::new();
        rig.metrics.set_voltage_v(25.0);
        let ctx = KernelSafetyContext::new(fast_config(), Collaborators::from_sim(&rig));
        assert!(ctx.start().is_err());
        assert!(!ctx.is_running());
    }

    #[tokio::test]
    async fn start_checks_boot_kpi_and_runs_until_shutdown()
    -> Result<(), Box<dyn std::error::Error>> {
        let rig = SimRig::new();
        rig.metrics.set_boot_time_ms(20_000);
        let ctx = KernelSafetyContext::new(fast_config(), Collaborators::from_sim(&rig));
        let mut telemetry = ctx.bus().subscribe_to(Topic::Telemetry);

        ctx.start()?;
        ctx.start()?;
        assert!(ctx.is_running());
        assert_eq!(rig.alerts.at_level(AlertLevel::Warning).len(), 1);

        let event = telemetry.recv().await?;
        assert!(matches!(event.payload, EventPayload::Telemetry(_)));

        ctx.shutdown().await;
        assert!(!ctx.is_running());
        Ok(())
    }

    #[tokio::test]
    async fn injected_fault_escalates_through_the_loop() -> Result<(), Box<dyn std::error::Error>>
    {
        let rig = SimRig::new();
        let ctx = KernelSafetyContext::new(fast_config(), Collaborators::from_sim(&rig));
        let mut transitions = ctx.bus().subscribe_to(Topic::FaultState);
        ctx.start()?;

        rig.metrics
            .inject_fault(FaultEvent::new(FaultCode::OverTemperature, "cell 3"));

        loop {
            if let EventPayload::FaultTransition { to, .. } = transitions.recv().await?.payload {
                if to == FaultState::Halted {
                    break;
                }
            }
        }
        ctx.shutdown().await;

        assert_eq!(ctx.fault_state(), FaultState::Halted);
        assert_eq!(rig.power.throttle_calls(), vec![10, 0]);
        assert_eq!(rig.power.shutdown_calls(), vec![1]);
        Ok(())
    }

    #[test]
    fn raw_fault_codes_are_mapped() {
        let rig = SimRig::new();
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));

        let outcome = ctx.report_raw_fault(102, "pack at 2%");
        assert!(matches!(
            outcome,
            FaultOutcome::ShutdownInitiated {
                code: FaultCode::ExtremeDischarge,
                delay_secs: 3,
                ..
            }
        ));
        assert!(matches!(
            ctx.report_raw_fault(103, "late"),
            FaultOutcome::AlreadyShuttingDown { .. }
        ));
    }

    #[tokio::test]
    async fn alerts_go_to_the_bus_when_no_channel_is_given()
    -> Result<(), Box<dyn std::error::Error>> {
        let rig = SimRig::new();
        let collaborators = Collaborators {
            alerts: None,
            ..Collaborators::from_sim(&rig)
        };
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), collaborators);
        let mut alerts = ctx.bus().subscribe_to(Topic::SystemAlerts);

        ctx.report_raw_fault(103, "bms silent");

        match alerts.recv().await?.payload {
            EventPayload::Alert(alert) => assert_eq!(alert.level, AlertLevel::Critical),
            other => panic!("unexpected payload: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn submit_goes_through_the_scheduler() {
        let rig = SimRig::new();
        let ctx = KernelSafetyContext::new(SafetyConfig::default(), Collaborators::from_sim(&rig));
        let handle = ctx.submit(TaskSpec::new("job", || {})).unwrap();
        assert_eq!(ctx.scheduler().active_count(), 1);
        assert_eq!(ctx.report().active_tasks, 1);
        assert!(ctx.scheduler().status(handle.id()).is_some());
    }
}
