//! Capture session state machine
//!
//! Idle → Running ⇄ Paused
//! Running/Paused → Stopping → Finalizing → Idle

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No session active; the input device is free.
    #[default]
    Idle,

    /// The capture worker is pulling frames from the device.
    Running,

    /// Device reads suspended; file and effect state retained.
    Paused,

    /// Stop requested; waiting for the worker to drain and exit.
    Stopping,

    /// Worker gone; tail trim, header rewrite and optional noise
    /// reduction in progress.
    Finalizing,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, CaptureState::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, CaptureState::Paused)
    }

    /// True while the session owns the input device (Running or Paused).
    pub fn is_active(&self) -> bool {
        matches!(self, CaptureState::Running | CaptureState::Paused)
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Running => write!(f, "Running"),
            CaptureState::Paused => write!(f, "Paused"),
            CaptureState::Stopping => write!(f, "Stopping"),
            CaptureState::Finalizing => write!(f, "Finalizing"),
        }
    }
}
