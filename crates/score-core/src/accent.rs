//! Beat-quantized kill accents.
//!
//! Kills arrive at arbitrary rates; the dispatcher turns them into at most one
//! short percussive hit per beat. The queue is bounded by trimming, so the
//! caller is never blocked or refused.

use std::collections::VecDeque;

use crate::backend::{GainRamp, ToneBackend, ToneHandle, Waveform};
use crate::constants::*;
use crate::tone::ToneSource;

/// Pitch class of an accent, chosen from the enemy category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccentClass {
    Heavy,
    Swarm,
    Standard,
}

impl AccentClass {
    /// Unknown categories fall back to `Standard`.
    pub fn from_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "tank" | "boss" | "heavy" | "carrier" | "juggernaut" => AccentClass::Heavy,
            "swarm" | "fast" | "scout" | "drone" | "swarmer" => AccentClass::Swarm,
            _ => AccentClass::Standard,
        }
    }

    pub fn frequency_hz(self) -> f32 {
        match self {
            AccentClass::Heavy => ACCENT_HEAVY_HZ,
            AccentClass::Swarm => ACCENT_SWARM_HZ,
            AccentClass::Standard => ACCENT_DEFAULT_HZ,
        }
    }

    pub fn waveform(self) -> Waveform {
        match self {
            AccentClass::Heavy => Waveform::Sine,
            AccentClass::Swarm => Waveform::Square,
            AccentClass::Standard => Waveform::Triangle,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccentRequest {
    pub category: String,
    pub intensity: f32,
}

impl AccentRequest {
    pub fn new(category: impl Into<String>, intensity: f32) -> Self {
        let intensity = if intensity.is_nan() {
            0.0
        } else {
            intensity.clamp(0.0, 1.0)
        };
        Self {
            category: category.into(),
            intensity,
        }
    }

    pub fn class(&self) -> AccentClass {
        AccentClass::from_category(&self.category)
    }
}

/// What a rendered accent sounded like.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedAccent {
    pub handle: ToneHandle,
    pub class: AccentClass,
    pub frequency_hz: f32,
    pub peak_gain: f32,
    pub ends_at: f64,
}

#[derive(Default)]
pub struct AccentDispatcher {
    queue: VecDeque<AccentRequest>,
    // Accent tones still ringing, so a teardown can silence them early
    ringing: Vec<(ToneHandle, f64)>,
}

impl AccentDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unconditionally; past the limit keep only the newest few.
    pub fn queue(&mut self, request: AccentRequest) {
        self.queue.push_back(request);
        if self.queue.len() > ACCENT_QUEUE_LIMIT {
            let drop = self.queue.len() - ACCENT_QUEUE_KEEP;
            self.queue.drain(..drop);
            log::debug!("accent queue trimmed to {}", self.queue.len());
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn peek(&self) -> Option<&AccentRequest> {
        self.queue.front()
    }

    /// Dequeue one request (FIFO) and play it. Called once per beat.
    pub fn drain_one<B: ToneBackend>(&mut self, backend: &mut B) -> Option<RenderedAccent> {
        let now = backend.now();
        self.prune(now);
        let request = self.queue.pop_front()?;
        self.render(backend, &request, now)
    }

    /// Short percussive tone: fast linear attack, exponential decay.
    fn render<B: ToneBackend>(
        &mut self,
        backend: &mut B,
        request: &AccentRequest,
        now: f64,
    ) -> Option<RenderedAccent> {
        let class = request.class();
        let frequency_hz = class.frequency_hz();
        let mut tone = match ToneSource::create(backend, class.waveform(), frequency_hz) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("kill accent dropped: {}", e);
                return None;
            }
        };
        let peak_gain = (ACCENT_PEAK_GAIN * request.intensity).max(ACCENT_FLOOR_GAIN);
        let ends_at = now + ACCENT_DURATION_SEC;
        tone.ramp_amplitude(backend, 0.0, GainRamp::Set, now);
        tone.ramp_amplitude(backend, peak_gain, GainRamp::Linear, now + ACCENT_ATTACK_SEC);
        tone.ramp_amplitude(backend, ACCENT_FLOOR_GAIN, GainRamp::Exponential, ends_at);
        let handle = tone.handle();
        // Scheduled stop; the backend releases the tone once it ends.
        tone.stop(backend, ends_at);
        self.ringing.push((handle, ends_at));
        log::trace!("accent {:?} for '{}' at {:.3}", class, request.category, now);
        Some(RenderedAccent {
            handle,
            class,
            frequency_hz,
            peak_gain,
            ends_at,
        })
    }

    fn prune(&mut self, now: f64) {
        self.ringing.retain(|(_, ends)| *ends > now);
    }

    /// Accent tones still sounding at `now`.
    pub fn ringing_count(&self, now: f64) -> usize {
        self.ringing.iter().filter(|(_, ends)| *ends > now).count()
    }

    /// Drop every pending request and cut any ringing accent off now.
    pub fn clear<B: ToneBackend>(&mut self, backend: &mut B) {
        let now = backend.now();
        self.queue.clear();
        for (handle, ends) in self.ringing.drain(..) {
            if ends <= now {
                continue;
            }
            // Pull the scheduled stop forward to now.
            let cut = backend
                .set_gain(handle, 0.0, GainRamp::Set, now)
                .and_then(|_| backend.stop(handle, now));
            if let Err(e) = cut {
                log::trace!("accent already gone: {}", e);
            }
        }
    }
}
