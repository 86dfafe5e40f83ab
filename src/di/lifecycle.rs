use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Result, TrellisError};

/// Application phase. Provider registration is only legal while
/// configuring; the builder flips the phase to `Initialized` when the
/// registrations are frozen, and to `Running` when the transport starts
/// serving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[repr(u8)]
pub enum AppPhase {
    Configuring = 0,
    Initialized = 1,
    Running = 2,
}

impl AppPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Configuring,
            1 => Self::Initialized,
            _ => Self::Running,
        }
    }
}

/// Shared phase cell. Cloned into every component that must observe or
/// guard against the application lifecycle.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    phase: Arc<AtomicU8>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> AppPhase {
        AppPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn mark_initialized(&self) {
        self.phase.store(AppPhase::Initialized as u8, Ordering::Release);
    }

    pub fn mark_running(&self) {
        self.phase.store(AppPhase::Running as u8, Ordering::Release);
    }

    /// Guard for configuration-time operations.
    pub fn ensure_configuring(&self, operation: &str) -> Result<()> {
        let phase = self.phase();
        if phase == AppPhase::Configuring {
            Ok(())
        } else {
            Err(TrellisError::lifecycle(format!(
                "cannot {operation} once the application is {phase}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_after_initialization() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_configuring("register a provider").is_ok());

        lifecycle.mark_initialized();
        let err = lifecycle
            .ensure_configuring("register a provider")
            .unwrap_err();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
        assert!(err.to_string().contains("Initialized"));
    }
}
