//! Generic `PowerControl` trait for the compute governor and the emergency
//! power-off line.

use tracing::{info, warn};
use vigil_types::KernelError;

/// Power-side actions available to the fault controller.
pub trait PowerControl: Send + Sync {
    /// Cap CPU/GPU performance at `percent` of nominal (`0` halts compute).
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::PowerControl`] if the governor rejects the cap.
    fn throttle(&self, percent: u8) -> Result<(), KernelError>;

    /// Persist system state to non-volatile storage ahead of power loss.
    fn save_state(&self) -> Result<(), KernelError>;

    /// Cut power after `delay_secs`.  Fire-and-forget: once requested the
    /// shutdown is assumed to happen, and on real hardware this may never
    /// return.
    fn emergency_shutdown(&self, delay_secs: u32);
}

/// Power control for hosts where the kernel must not touch real power
/// rails.  Every request is logged and otherwise ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPower;

impl DryRunPower {
    pub fn new() -> Self {
        Self
    }
}

impl PowerControl for DryRunPower {
    fn throttle(&self, percent: u8) -> Result<(), KernelError> {
        info!(percent, "dry-run: throttle requested");
        Ok(())
    }

    fn save_state(&self) -> Result<(), KernelError> {
        info!("dry-run: state save requested");
        Ok(())
    }

    fn emergency_shutdown(&self, delay_secs: u32) {
        warn!(delay_secs, "dry-run: emergency shutdown requested");
    }
}
