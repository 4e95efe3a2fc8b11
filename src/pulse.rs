//! Pulse train generation
//!
//! Pulse-only controllers silently drop continuous vibration commands, so a
//! "vibrate at A for D seconds" request is turned into one discrete pulse
//! every tick until the requested time has decayed.
//!
//! Each tick decrements the remaining time first and pulses only if time is
//! still left afterwards. The last tick with any time left still pulses,
//! and no pulse is ever sent once the time has run out.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ============================================================================
// Constants
// ============================================================================

/// Multiplier applied to amplitude and duration of every request
///
/// Discrete pulses feel weaker than the continuous signal callers tune
/// for, so requests are over-driven in both strength and length.
pub const VIBRATION_GAIN: f32 = 2.0;

/// Scaled amplitudes at or below this are dropped
pub const AMPLITUDE_THRESHOLD: f32 = 0.01;

/// Pulse emission rate
pub const TICK_RATE_HZ: u32 = 80;

/// Tick period in seconds (1/80)
pub const TICK_PERIOD_SECS: f32 = 1.0 / TICK_RATE_HZ as f32;

/// Tick period (12.5ms)
pub const TICK_PERIOD: Duration = Duration::from_micros(12_500);

/// Motor index pulses are sent to (single-motor devices)
pub const PULSE_CHANNEL: u32 = 0;

// ============================================================================
// Vibration state
// ============================================================================

/// Decaying vibration request for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VibrationState {
    /// Seconds of the latest request not yet played out (never negative)
    remaining_time: f32,
    /// Strength of the next pulse, 0.0..=1.0
    pending_amplitude: f32,
}

impl VibrationState {
    pub fn new(remaining_time: f32, pending_amplitude: f32) -> Self {
        Self {
            remaining_time: remaining_time.max(0.0),
            pending_amplitude: pending_amplitude.clamp(0.0, 1.0),
        }
    }

    pub fn remaining_time(&self) -> f32 {
        self.remaining_time
    }

    pub fn pending_amplitude(&self) -> f32 {
        self.pending_amplitude
    }

    /// Whether any requested time is left to play
    pub fn is_active(&self) -> bool {
        self.remaining_time > 0.0
    }

    /// Record a continuous vibration request
    ///
    /// Applies [`VIBRATION_GAIN`], drops near-zero amplitudes, and otherwise
    /// overwrites the current request entirely. Returns whether the request
    /// was accepted.
    pub fn request(&mut self, amplitude: f32, duration_secs: f32) -> bool {
        let amplitude = amplitude * VIBRATION_GAIN;
        let duration = duration_secs * VIBRATION_GAIN;

        // A weak request must not cut off a stronger one still decaying
        if !amplitude.is_finite() || !duration.is_finite() || amplitude <= AMPLITUDE_THRESHOLD {
            return false;
        }

        self.remaining_time = duration.max(0.0);
        self.pending_amplitude = amplitude.clamp(0.0, 1.0);
        true
    }

    /// Advance by one tick
    ///
    /// Returns the amplitude to pulse at, or `None` once the request has
    /// fully decayed.
    pub fn advance(&mut self, period_secs: f32) -> Option<f32> {
        let remaining = self.remaining_time - period_secs;
        self.remaining_time = remaining.max(0.0);

        if remaining > 0.0 {
            Some(self.pending_amplitude)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.remaining_time = 0.0;
        self.pending_amplitude = 0.0;
    }
}

// ============================================================================
// Pulse loop task
// ============================================================================

/// Fixed-rate repeating task driving one channel's pulse train
///
/// The first tick fires immediately. The task runs until [`PulseLoop::stop`]
/// is called or the loop is dropped.
#[derive(Debug)]
pub struct PulseLoop {
    handle: JoinHandle<()>,
}

impl PulseLoop {
    /// Spawn a loop calling `on_tick` every `period` on `runtime`
    pub fn spawn<F>(runtime: &Handle, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                on_tick();
            }
        });

        Self { handle }
    }

    /// Cancel the loop; safe to call repeatedly
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PulseLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
