//! [`CriticalFaultController`] – escalation state machine for battery and
//! thermal faults.
//!
//! Every fault leads to a controlled shutdown; the fault code only decides
//! which protective steps run first and how long the shutdown is delayed:
//!
//! | Fault | Steps | Delay |
//! |---|---|---|
//! | over-temperature | CRITICAL alert, throttle to 10 % | 1 s |
//! | extreme discharge | WARNING alert, RealTime save-state task | 3 s |
//! | BMS failure | CRITICAL alert | 0 s |
//! | unknown | CRITICAL alert | 5 s |
//!
//! All paths finish with a 0 % throttle, the `Halted` state and an
//! emergency shutdown request.  Once the machine has left `Normal`, further
//! faults are logged and ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};
use vigil_hal::{MetricsSource, PowerControl};
use vigil_middleware::{EventBus, Topic};
use vigil_types::{Event, EventPayload, FaultCode, FaultEvent, FaultState, Priority};

use crate::alerting::AlertDispatcher;
use crate::scheduler::{TaskScheduler, TaskSpec};

const SOURCE: &str = "vigil-kernel::fault_controller";

const THERMAL_THROTTLE_PERCENT: u8 = 10;
const OVER_TEMPERATURE_DELAY_SECS: u32 = 1;
const EXTREME_DISCHARGE_DELAY_SECS: u32 = 3;
const BMS_FAILURE_DELAY_SECS: u32 = 0;
const UNKNOWN_FAULT_DELAY_SECS: u32 = 5;

/// One step of the escalation machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FaultState,
    pub to: FaultState,
}

/// Result of [`CriticalFaultController::handle_critical_error`].
#[derive(Debug, Clone, PartialEq)]
pub enum FaultOutcome {
    /// A sequence already ran; this fault changed nothing.
    AlreadyShuttingDown { state: FaultState },
    ShutdownInitiated {
        code: FaultCode,
        transitions: Vec<Transition>,
        delay_secs: u32,
    },
}

#[derive(Default)]
struct Machine {
    state: FaultState,
    history: Vec<Transition>,
}

pub struct CriticalFaultController {
    machine: Mutex<Machine>,
    scheduler: Arc<TaskScheduler>,
    power: Arc<dyn PowerControl>,
    metrics: Arc<dyn MetricsSource>,
    alerts: Arc<AlertDispatcher>,
    bus: Option<EventBus>,
}

impl CriticalFaultController {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        power: Arc<dyn PowerControl>,
        metrics: Arc<dyn MetricsSource>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            machine: Mutex::new(Machine::default()),
            scheduler,
            power,
            metrics,
            alerts,
            bus: None,
        }
    }

    /// Publish every transition on the `FaultState` topic.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn state(&self) -> FaultState {
        self.machine().state
    }

    /// Every transition taken since construction, oldest first.
    pub fn transitions(&self) -> Vec<Transition> {
        self.machine().history.clone()
    }

    /// Run the escalation sequence for `event`.
    ///
    /// The state check and every step up to `Halted` happen under one lock,
    /// so at most one sequence ever runs.  The lock is released before the
    /// emergency shutdown request, which may block forever.  Collaborator
    /// failures are logged and the sequence carries on to the shutdown.
    pub fn handle_critical_error(&self, event: FaultEvent) -> FaultOutcome {
        let mut machine = self.machine();
        if machine.state != FaultState::Normal {
            warn!(
                code = %event.code,
                state = %machine.state,
                "shutdown already in progress; fault ignored"
            );
            return FaultOutcome::AlreadyShuttingDown {
                state: machine.state,
            };
        }

        error!(code = %event.code, detail = %event.detail, "critical fault received");
        let first = machine.history.len();

        let delay_secs = match event.code {
            FaultCode::OverTemperature => {
                let detail = match self.metrics.battery_temperature_c() {
                    Ok(celsius) => format!("Battery at {celsius}°C. {}", event.detail),
                    Err(e) => {
                        warn!(error = %e, "battery temperature unreadable");
                        format!("Battery temperature unavailable. {}", event.detail)
                    }
                };
                self.alerts.critical("Battery over-temperature", detail);
                self.throttle(THERMAL_THROTTLE_PERCENT);
                self.advance(&mut machine, FaultState::Throttling);
                OVER_TEMPERATURE_DELAY_SECS
            }
            FaultCode::ExtremeDischarge => {
                self.alerts.warning(
                    "Battery critically low",
                    format!("Saving state before shutdown. {}", event.detail),
                );
                self.schedule_save_state();
                self.advance(&mut machine, FaultState::SavingState);
                EXTREME_DISCHARGE_DELAY_SECS
            }
            FaultCode::BmsFailure => {
                self.alerts.critical(
                    "Battery management failure",
                    format!("BMS readings untrusted. {}", event.detail),
                );
                BMS_FAILURE_DELAY_SECS
            }
            FaultCode::Unknown(code) => {
                self.alerts.critical(
                    "Unknown critical fault",
                    format!("Code {code}: {}", event.detail),
                );
                UNKNOWN_FAULT_DELAY_SECS
            }
        };

        self.advance(&mut machine, FaultState::ShutdownPending);
        self.throttle(0);
        self.advance(&mut machine, FaultState::Halted);
        let transitions = machine.history[first..].to_vec();
        // The shutdown line may never return; later faults must still see
        // `Halted` and bail out instead of queueing on the lock.
        drop(machine);

        warn!(delay_secs, code = %event.code, "emergency shutdown requested");
        self.power.emergency_shutdown(delay_secs);

        FaultOutcome::ShutdownInitiated {
            code: event.code,
            transitions,
            delay_secs,
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, machine: &mut Machine, to: FaultState) {
        let from = machine.state;
        if !from.can_transition_to(to) {
            warn!(%from, %to, "illegal fault transition skipped");
            return;
        }
        machine.state = to;
        machine.history.push(Transition { from, to });
        info!(%from, %to, "fault state transition");

        if let Some(bus) = &self.bus {
            bus.emit(
                Topic::FaultState,
                Event::new(SOURCE, EventPayload::FaultTransition { from, to }),
            );
        }
    }

    fn throttle(&self, percent: u8) {
        if let Err(e) = self.power.throttle(percent) {
            error!(percent, error = %e, "throttle failed; continuing shutdown");
        }
    }

    fn schedule_save_state(&self) {
        let power = Arc::clone(&self.power);
        let spec = TaskSpec::new("save-state", move || {
            if let Err(e) = power.save_state() {
                error!(error = %e, "state save failed");
            }
        })
        .priority(Priority::RealTime)
        .io_bound(true);

        if let Err(e) = self.scheduler.submit(spec) {
            error!(error = %e, "save-state task not scheduled; continuing shutdown");
        }
    }
}
