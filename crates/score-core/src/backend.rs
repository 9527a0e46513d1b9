//! Tone-synthesis capability set the engine drives.
//!
//! The engine never touches a platform audio API directly. It asks a
//! [`ToneBackend`] for continuous oscillators, automates their gain and pitch,
//! and stops them. Frontends implement the trait over WebAudio or a native
//! mixer; [`OfflineBackend`] records everything against a manual clock and is
//! used by tests and headless runs.

use fnv::FnvHashMap;
use thiserror::Error;

// Gain automation points kept per offline tone; older ones are dropped
pub const OFFLINE_GAIN_HISTORY: usize = 64;

/// Basic oscillator shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Triangle,
}

/// Opaque reference to a tone owned by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToneHandle(pub u32);

/// How a gain change reaches its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GainRamp {
    /// Jump to the value at the given time.
    Set,
    /// Linear ramp from the previous automation point, ending at the given time.
    Linear,
    /// Exponential ramp from the previous automation point, ending at the given time.
    Exponential,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("audio backend unavailable")]
    Unavailable,
    #[error("tone {0:?} is stopped or unknown")]
    StaleHandle(ToneHandle),
    #[error("audio backend rejected the request: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Platform tone synthesis. All times are on the backend's audio clock.
pub trait ToneBackend {
    /// Create and start a tone at zero gain.
    fn create_tone(&mut self, waveform: Waveform, frequency_hz: f32) -> BackendResult<ToneHandle>;

    /// Schedule a gain change ending at `at`.
    fn set_gain(
        &mut self,
        handle: ToneHandle,
        value: f32,
        ramp: GainRamp,
        at: f64,
    ) -> BackendResult<()>;

    /// Glide the frequency toward `frequency_hz` starting at `at`.
    fn set_frequency(
        &mut self,
        handle: ToneHandle,
        frequency_hz: f32,
        at: f64,
        time_constant: f64,
    ) -> BackendResult<()>;

    /// Stop the tone at `at` and release it. A stop that has not taken effect
    /// yet may be rescheduled by calling again; once the tone has ended this is
    /// a stale-handle error.
    fn stop(&mut self, handle: ToneHandle, at: f64) -> BackendResult<()>;

    /// Gain applied to everything the engine produces.
    fn set_master_gain(&mut self, value: f32);

    /// Monotonic audio clock in seconds.
    fn now(&self) -> f64;
}

/// One tone as observed by [`OfflineBackend`].
#[derive(Clone, Debug, PartialEq)]
pub struct OfflineTone {
    pub waveform: Waveform,
    pub initial_frequency_hz: f32,
    pub frequency_hz: f32,
    pub gain: f32,
    pub created_at: f64,
    pub stop_at: Option<f64>,
    /// Most recent gain requests, oldest first, capped at `OFFLINE_GAIN_HISTORY`.
    pub gain_events: Vec<(f32, GainRamp, f64)>,
}

impl OfflineTone {
    /// Whether the tone is still sounding at `time`.
    pub fn is_live_at(&self, time: f64) -> bool {
        match self.stop_at {
            Some(t) => time < t,
            None => true,
        }
    }
}

/// Backend with a manual clock that records every request.
///
/// Stopped tones stay in the table so tests can inspect what was played.
#[derive(Debug, Default)]
pub struct OfflineBackend {
    now: f64,
    next_handle: u32,
    master_gain: f32,
    tones: FnvHashMap<ToneHandle, OfflineTone>,
    fail_creates: bool,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self {
            master_gain: 1.0,
            ..Default::default()
        }
    }

    /// Advance the audio clock.
    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds.max(0.0);
    }

    /// Make every subsequent `create_tone` fail (simulates resource exhaustion).
    pub fn set_fail_creates(&mut self, fail: bool) {
        self.fail_creates = fail;
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn tone(&self, handle: ToneHandle) -> Option<&OfflineTone> {
        self.tones.get(&handle)
    }

    /// Every tone ever created, in creation order.
    pub fn tones(&self) -> Vec<(ToneHandle, &OfflineTone)> {
        let mut all: Vec<_> = self.tones.iter().map(|(h, t)| (*h, t)).collect();
        all.sort_by_key(|(h, _)| *h);
        all
    }

    /// Tones that have not been stopped (or whose stop lies in the future).
    pub fn live_tone_count(&self) -> usize {
        self.tones
            .values()
            .filter(|t| t.is_live_at(self.now))
            .count()
    }

    fn live_mut(&mut self, handle: ToneHandle) -> BackendResult<&mut OfflineTone> {
        let now = self.now;
        match self.tones.get_mut(&handle) {
            Some(t) if t.stop_at.map_or(true, |s| s > now) => Ok(t),
            _ => Err(BackendError::StaleHandle(handle)),
        }
    }
}

impl ToneBackend for OfflineBackend {
    fn create_tone(&mut self, waveform: Waveform, frequency_hz: f32) -> BackendResult<ToneHandle> {
        if self.fail_creates {
            return Err(BackendError::Rejected("tone creation disabled".into()));
        }
        let handle = ToneHandle(self.next_handle);
        self.next_handle += 1;
        self.tones.insert(
            handle,
            OfflineTone {
                waveform,
                initial_frequency_hz: frequency_hz,
                frequency_hz,
                gain: 0.0,
                created_at: self.now,
                stop_at: None,
                gain_events: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn set_gain(
        &mut self,
        handle: ToneHandle,
        value: f32,
        ramp: GainRamp,
        at: f64,
    ) -> BackendResult<()> {
        let tone = self.live_mut(handle)?;
        tone.gain = value;
        tone.gain_events.push((value, ramp, at));
        if tone.gain_events.len() > OFFLINE_GAIN_HISTORY {
            let excess = tone.gain_events.len() - OFFLINE_GAIN_HISTORY;
            tone.gain_events.drain(..excess);
        }
        Ok(())
    }

    fn set_frequency(
        &mut self,
        handle: ToneHandle,
        frequency_hz: f32,
        _at: f64,
        _time_constant: f64,
    ) -> BackendResult<()> {
        self.live_mut(handle)?.frequency_hz = frequency_hz;
        Ok(())
    }

    fn stop(&mut self, handle: ToneHandle, at: f64) -> BackendResult<()> {
        let tone = self
            .tones
            .get_mut(&handle)
            .ok_or(BackendError::StaleHandle(handle))?;
        match tone.stop_at {
            Some(t) if t <= self.now => Err(BackendError::StaleHandle(handle)),
            _ => {
                tone.stop_at = Some(at);
                Ok(())
            }
        }
    }

    fn set_master_gain(&mut self, value: f32) {
        self.master_gain = value;
    }

    fn now(&self) -> f64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_stop_is_terminal() {
        let mut b = OfflineBackend::new();
        let h = b.create_tone(Waveform::Sine, 220.0).unwrap();
        assert_eq!(b.live_tone_count(), 1);
        b.stop(h, 0.0).unwrap();
        assert_eq!(b.live_tone_count(), 0);
        assert_eq!(b.stop(h, 0.0), Err(BackendError::StaleHandle(h)));
        assert!(b.set_gain(h, 0.5, GainRamp::Set, 0.0).is_err());
    }

    #[test]
    fn offline_future_stop_keeps_tone_live_until_due() {
        let mut b = OfflineBackend::new();
        let h = b.create_tone(Waveform::Square, 100.0).unwrap();
        b.stop(h, 0.1).unwrap();
        assert_eq!(b.live_tone_count(), 1);
        b.advance(0.1);
        assert_eq!(b.live_tone_count(), 0);
    }

    #[test]
    fn offline_gain_history_is_bounded() {
        let mut b = OfflineBackend::new();
        let h = b.create_tone(Waveform::Sine, 220.0).unwrap();
        for i in 0..1000 {
            b.set_gain(h, 0.1, GainRamp::Linear, i as f64).unwrap();
        }
        let tone = b.tone(h).unwrap();
        assert_eq!(tone.gain_events.len(), OFFLINE_GAIN_HISTORY);
        assert_eq!(tone.gain_events.last().unwrap().2, 999.0);
        assert_eq!(tone.gain, 0.1);
    }

    #[test]
    fn offline_failing_creates_report_rejected() {
        let mut b = OfflineBackend::new();
        b.set_fail_creates(true);
        assert!(matches!(
            b.create_tone(Waveform::Saw, 440.0),
            Err(BackendError::Rejected(_))
        ));
    }
}
