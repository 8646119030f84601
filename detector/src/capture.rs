//! Seams for the platform-specific collaborators: minimap capture,
//! calibration, and OS key injection.
//!
//! The real implementations (screen grab + color-blob detection, the
//! interactive region picker, and the input-synthesis call) are external to
//! this crate and plug in behind these traits. The crate ships a simulated
//! detector and a logging injector so the whole pipeline runs end to end
//! without a game on screen.

use log::info;
use rand::Rng;
use shared::{MinimapConfig, Position};
use std::sync::Mutex;

/// Locates the local character inside the calibrated minimap region.
/// Returns None when the character marker is not visible this cycle;
/// absence is not an error, the caller just skips the tick.
pub trait PositionDetector: Send + Sync {
    fn detect(&self, config: &MinimapConfig) -> Option<Position>;
}

/// Result of the interactive minimap calibration flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationOutcome {
    Configured(MinimapConfig),
    Cancelled,
    Failed(String),
}

/// Runs the interactive region-selection flow. Blocking; callers should
/// dispatch through `spawn_blocking`.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self) -> CalibrationOutcome;
}

/// Fires a single synthetic key press. Must be cheap; pacing between
/// presses is the dispatcher's job.
pub trait KeyInjector: Send + Sync {
    fn press(&self, key: &str);
}

/// Injector that only logs, for running without OS input synthesis.
pub struct LoggingInjector;

impl KeyInjector for LoggingInjector {
    fn press(&self, key: &str) {
        info!("Injecting key press '{}'", key);
    }
}

/// Detector stand-in: a bounded random walk inside the configured region.
///
/// Useful for exercising the relay and proximity pipeline on machines
/// without the capture stack.
pub struct SimulatedDetector {
    position: Mutex<Option<Position>>,
    /// Maximum per-tick movement along each axis, in pixels.
    step: f32,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self {
            position: Mutex::new(None),
            step: 5.0,
        }
    }

    pub fn with_start(pos: Position) -> Self {
        Self {
            position: Mutex::new(Some(pos)),
            step: 5.0,
        }
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionDetector for SimulatedDetector {
    fn detect(&self, config: &MinimapConfig) -> Option<Position> {
        let mut guard = match self.position.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut rng = rand::thread_rng();
        let width = config.width as f32;
        let height = config.height as f32;

        let next = match *guard {
            Some(current) => Position::new(
                (current.x + rng.gen_range(-self.step..=self.step)).clamp(0.0, width),
                (current.y + rng.gen_range(-self.step..=self.step)).clamp(0.0, height),
            ),
            None => Position::new(rng.gen_range(0.0..=width), rng.gen_range(0.0..=height)),
        };

        *guard = Some(next);
        Some(next)
    }
}

/// Calibrator stand-in that always returns a fixed region.
pub struct FixedCalibrator {
    pub config: MinimapConfig,
}

impl Calibrator for FixedCalibrator {
    fn calibrate(&self) -> CalibrationOutcome {
        CalibrationOutcome::Configured(self.config)
    }
}
