//! Per-camera rolling statistics.

use std::time::{Duration, Instant};

use safeguard_models::{round_one_decimal, CameraId, CameraStats, CameraStatus, ComplianceSummary};
use safeguard_vision::Frame;

/// Frames between frame-rate recomputations.
pub const DEFAULT_FPS_WINDOW: u32 = 30;

/// Frame-rate meter recomputed every `window` frames from elapsed wall time.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: u32,
    frames: u32,
    window_start: Instant,
    fps: f64,
}

impl FpsMeter {
    pub fn new(window: u32, start: Instant) -> Self {
        Self {
            window: window.max(1),
            frames: 0,
            window_start: start,
            fps: 0.0,
        }
    }

    /// Count one frame. Returns the new rate when a window completes.
    pub fn on_frame(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        if self.frames < self.window {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed > Duration::ZERO {
            self.fps = round_one_decimal(self.frames as f64 / elapsed.as_secs_f64());
        }
        self.frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

/// Live state of one camera.
///
/// Written only by the camera's worker; stats and frame queries read it
/// under the same lock.
#[derive(Debug, Clone)]
pub struct CameraState {
    pub camera_id: CameraId,
    pub status: CameraStatus,
    /// Most recent annotated frame; `None` until the first frame is processed
    pub latest_annotated_frame: Option<Frame>,
    pub fps: f64,
    pub summary: ComplianceSummary,
    pub last_violation_at: Option<Instant>,
    pub frames_processed: u64,
    pub detection_runs: u64,
}

impl CameraState {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            status: CameraStatus::Starting,
            latest_annotated_frame: None,
            fps: 0.0,
            summary: ComplianceSummary::default(),
            last_violation_at: None,
            frames_processed: 0,
            detection_runs: 0,
        }
    }

    /// Whether a violation may be logged at `now`.
    ///
    /// A camera that never logged one is always eligible; otherwise strictly
    /// more than `cooldown` must have passed.
    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_violation_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > cooldown,
        }
    }

    pub fn to_stats(&self) -> CameraStats {
        CameraStats {
            camera_id: self.camera_id.clone(),
            running: self.status == CameraStatus::Running,
            status: self.status,
            fps: self.fps,
            total_tracked: self.summary.total_tracked,
            active_violations: self.summary.active_violations,
            compliance_rate: self.summary.compliance_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_every_window() {
        let start = Instant::now();
        let mut meter = FpsMeter::new(30, start);

        for i in 1..30 {
            assert!(meter.on_frame(start + Duration::from_millis(i * 50)).is_none());
        }
        // 30 frames over 2 seconds
        assert_eq!(meter.on_frame(start + Duration::from_secs(2)), Some(15.0));
        assert_eq!(meter.fps(), 15.0);
    }

    #[test]
    fn test_cooldown_is_strict() {
        let now = Instant::now();
        let cooldown = Duration::from_secs(15);
        let mut state = CameraState::new(CameraId::from("cam01"));
        assert!(state.cooldown_elapsed(now, cooldown));

        state.last_violation_at = Some(now);
        assert!(!state.cooldown_elapsed(now + cooldown, cooldown));
        assert!(state.cooldown_elapsed(now + cooldown + Duration::from_millis(1), cooldown));
    }

    #[test]
    fn test_fresh_state_stats() {
        let stats = CameraState::new(CameraId::from("cam03")).to_stats();
        assert!(!stats.running);
        assert_eq!(stats.compliance_rate, 100.0);
    }
}
