//! Smoothed gameplay tension and everything derived from it: tempo, beat
//! duration, and which additive layers should be playing.

use crate::constants::*;
use crate::layer::LayerKind;

/// Minimum-interval gate. Time is passed in, so it runs on any clock.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: f64,
    last: Option<f64>,
}

impl RateLimiter {
    pub fn new(min_interval: f64) -> Self {
        Self {
            min_interval: min_interval.max(0.0),
            last: None,
        }
    }

    /// Returns true (and records `now`) when at least `min_interval` has
    /// passed since the last accepted call.
    pub fn try_acquire(&mut self, now: f64) -> bool {
        match self.last {
            Some(last) if now - last < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Tempo and smoothing knobs.
#[derive(Clone, Debug)]
pub struct TensionParams {
    pub tempo_base_bpm: f64,
    pub tempo_range_bpm: f64,
    pub smoothing: f32,
    pub debounce_sec: f64,
}

impl Default for TensionParams {
    fn default() -> Self {
        Self {
            tempo_base_bpm: TEMPO_BASE_BPM,
            tempo_range_bpm: TEMPO_RANGE_BPM,
            smoothing: TENSION_SMOOTHING,
            debounce_sec: THRESHOLD_DEBOUNCE_SEC,
        }
    }
}

impl TensionParams {
    /// Replace unusable values: non-finite knobs fall back to their defaults,
    /// smoothing is kept in (0, 1] and the debounce is never negative.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        let smoothing = if self.smoothing.is_finite() && self.smoothing > 0.0 {
            self.smoothing.min(1.0)
        } else {
            d.smoothing
        };
        Self {
            tempo_base_bpm: finite_or(self.tempo_base_bpm, d.tempo_base_bpm),
            tempo_range_bpm: finite_or(self.tempo_range_bpm, d.tempo_range_bpm),
            smoothing,
            debounce_sec: finite_or(self.debounce_sec, d.debounce_sec).max(0.0),
        }
    }
}

/// Owns the smoothed tension (single writer; layers and the beat clock read it).
#[derive(Clone, Debug)]
pub struct TensionController {
    params: TensionParams,
    current: f32,
    target: f32,
    beat_duration: f64,
    limiter: RateLimiter,
}

impl TensionController {
    pub fn new(params: TensionParams) -> Self {
        let params = params.sanitized();
        let limiter = RateLimiter::new(params.debounce_sec);
        let mut c = Self {
            params,
            current: 0.0,
            target: 0.0,
            beat_duration: 1.0,
            limiter,
        };
        c.beat_duration = c.beat_duration_for(0.0);
        c
    }

    /// Store a new target. Out-of-range values clamp; NaN keeps the old target.
    pub fn set_target(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.target = value.clamp(0.0, 1.0);
    }

    /// Move a fixed fraction of the remaining gap toward the target and
    /// refresh the beat duration.
    pub fn step(&mut self) {
        let gap = self.target - self.current;
        let next = (self.current + gap * self.params.smoothing).clamp(0.0, 1.0);
        // f32 can stall a hair short of the target; snap once the step stops moving.
        if gap.abs() <= TENSION_EPSILON || next == self.current {
            self.current = self.target;
        } else {
            self.current = next;
        }
        self.beat_duration = self.beat_duration_for(self.current);
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.tempo_for(self.current)
    }

    pub fn beat_duration(&self) -> f64 {
        self.beat_duration
    }

    pub fn tempo_for(&self, tension: f32) -> f64 {
        self.params.tempo_base_bpm + tension.clamp(0.0, 1.0) as f64 * self.params.tempo_range_bpm
    }

    /// Seconds per beat. A degenerate tempo (zero, negative, infinite or NaN)
    /// falls back to the shortest timer period instead of reaching zero.
    pub fn beat_duration_for(&self, tension: f32) -> f64 {
        let duration = 60.0 / self.tempo_for(tension).max(1.0);
        if duration.is_finite() {
            duration.max(MIN_TIMER_PERIOD_SEC)
        } else {
            MIN_TIMER_PERIOD_SEC
        }
    }

    /// Whether add/remove decisions may run at `now`.
    pub fn should_evaluate(&mut self, now: f64) -> bool {
        self.limiter.try_acquire(now)
    }

    pub fn last_evaluation(&self) -> Option<f64> {
        self.limiter.last()
    }

    /// Threshold layers that should exist at the current tension.
    pub fn wanted_layers(&self) -> impl Iterator<Item = (LayerKind, bool)> + '_ {
        LayerKind::THRESHOLD
            .iter()
            .map(move |kind| (*kind, kind.is_wanted(self.current)))
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
        self.target = 0.0;
        self.beat_duration = self.beat_duration_for(0.0);
        self.limiter.reset();
    }
}

impl Default for TensionController {
    fn default() -> Self {
        Self::new(TensionParams::default())
    }
}
