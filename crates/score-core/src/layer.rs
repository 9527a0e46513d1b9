//! Additive musical layers.
//!
//! A layer is a small bundle of continuously running tones that share one
//! cyclic note sequence and fade in and out as a unit. The four kinds form a
//! closed set; everything that differs between them (voices, notes, gain
//! curve, threshold) hangs off [`LayerKind`].

use std::fmt;

use smallvec::SmallVec;

use crate::backend::{BackendResult, GainRamp, ToneBackend, Waveform};
use crate::constants::*;
use crate::music::midi_to_hz;
use crate::tone::ToneSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Base,
    Battle,
    Intense,
    Extreme,
}

/// One oscillator slot in a layer: its shape and relative level.
#[derive(Clone, Copy, Debug)]
pub struct LayerVoice {
    pub waveform: Waveform,
    pub weight: f32,
}

pub(crate) const fn voice(waveform: Waveform, weight: f32) -> LayerVoice {
    LayerVoice { waveform, weight }
}

const BASE_VOICES: &[LayerVoice] = &[voice(Waveform::Sine, 1.0), voice(Waveform::Triangle, 0.6)];
const BATTLE_VOICES: &[LayerVoice] = &[voice(Waveform::Saw, 0.7), voice(Waveform::Square, 0.5)];
const INTENSE_VOICES: &[LayerVoice] = &[voice(Waveform::Square, 0.6), voice(Waveform::Sine, 1.0)];
const EXTREME_VOICES: &[LayerVoice] = &[
    voice(Waveform::Saw, 0.6),
    voice(Waveform::Saw, 0.5),
    voice(Waveform::Triangle, 0.8),
];

// Note sequences in MIDI numbers (A minor), one column per voice.
const BASE_NOTES: &[&[i32]] = &[&[45, 57], &[41, 53], &[48, 60], &[43, 55]];
const BATTLE_NOTES: &[&[i32]] = &[
    &[57, 64],
    &[60, 64],
    &[64, 69],
    &[60, 67],
    &[57, 65],
    &[60, 65],
    &[62, 67],
    &[59, 67],
];
const INTENSE_NOTES: &[&[i32]] = &[&[69, 45], &[72, 45], &[72, 41], &[71, 43]];
const EXTREME_NOTES: &[&[i32]] = &[
    &[69, 72, 76],
    &[65, 69, 72],
    &[72, 76, 79],
    &[67, 71, 74],
];

impl LayerKind {
    pub const ALL: [LayerKind; 4] = [
        LayerKind::Base,
        LayerKind::Battle,
        LayerKind::Intense,
        LayerKind::Extreme,
    ];

    /// Kinds that come and go with tension.
    pub const THRESHOLD: [LayerKind; 3] =
        [LayerKind::Battle, LayerKind::Intense, LayerKind::Extreme];

    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Base => "base",
            LayerKind::Battle => "battle",
            LayerKind::Intense => "intense",
            LayerKind::Extreme => "extreme",
        }
    }

    /// Tension above which the layer plays. The base layer has none.
    pub fn threshold(self) -> Option<f32> {
        match self {
            LayerKind::Base => None,
            LayerKind::Battle => Some(BATTLE_THRESHOLD),
            LayerKind::Intense => Some(INTENSE_THRESHOLD),
            LayerKind::Extreme => Some(EXTREME_THRESHOLD),
        }
    }

    /// Same threshold both ways: present above it, absent at or below.
    pub fn is_wanted(self, tension: f32) -> bool {
        match self.threshold() {
            None => true,
            Some(t) => tension > t,
        }
    }

    /// Steady-state layer gain for a tension value.
    ///
    /// Threshold layers rise linearly from 0 at their threshold to their cap at
    /// full tension. The result is clamped, so tension sitting at or below the
    /// threshold while a decision is still debounced never goes negative.
    pub fn target_gain(self, tension: f32) -> f32 {
        let tension = tension.clamp(0.0, 1.0);
        let rise = |threshold: f32| ((tension - threshold) / (1.0 - threshold)).clamp(0.0, 1.0);
        match self {
            LayerKind::Base => BASE_GAIN_MIN + (BASE_GAIN_MAX - BASE_GAIN_MIN) * tension,
            LayerKind::Battle => BATTLE_GAIN_MAX * rise(BATTLE_THRESHOLD),
            LayerKind::Intense => INTENSE_GAIN_MAX * rise(INTENSE_THRESHOLD),
            LayerKind::Extreme => EXTREME_GAIN_MAX * rise(EXTREME_THRESHOLD),
        }
    }

    pub fn voices(self) -> &'static [LayerVoice] {
        match self {
            LayerKind::Base => BASE_VOICES,
            LayerKind::Battle => BATTLE_VOICES,
            LayerKind::Intense => INTENSE_VOICES,
            LayerKind::Extreme => EXTREME_VOICES,
        }
    }

    pub fn notes(self) -> &'static [&'static [i32]] {
        match self {
            LayerKind::Base => BASE_NOTES,
            LayerKind::Battle => BATTLE_NOTES,
            LayerKind::Intense => INTENSE_NOTES,
            LayerKind::Extreme => EXTREME_NOTES,
        }
    }

    /// Note sequence in Hz after transposing by `semitones`.
    pub fn sequence(self, semitones: i32) -> Vec<FrequencySet> {
        self.notes()
            .iter()
            .map(|step| {
                step.iter()
                    .map(|midi| midi_to_hz((midi + semitones) as f32))
                    .collect()
            })
            .collect()
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One frequency per tone in a layer, same index across tones.
pub type FrequencySet = SmallVec<[f32; 3]>;

/// Create one silent tone per voice, tuned to `first_step`.
///
/// If any tone fails, the ones already created are stopped and the error is
/// returned; nothing half-built is left behind.
pub(crate) fn spawn_voices<B: ToneBackend>(
    backend: &mut B,
    voices: &[LayerVoice],
    first_step: Option<&FrequencySet>,
) -> BackendResult<SmallVec<[ToneSource; 3]>> {
    let now = backend.now();
    let mut sources: SmallVec<[ToneSource; 3]> = SmallVec::new();
    for (i, v) in voices.iter().enumerate() {
        let hz = first_step
            .and_then(|step| step.get(i))
            .copied()
            .unwrap_or(110.0);
        match ToneSource::create(backend, v.waveform, hz) {
            Ok(tone) => sources.push(tone),
            Err(e) => {
                for s in sources.iter_mut() {
                    s.stop(backend, now);
                }
                return Err(e);
            }
        }
    }
    Ok(sources)
}

/// Identifies one layer instance. A new instance of the same kind gets a new id,
/// so timers aimed at a torn-down instance can tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeState {
    FadingIn,
    Steady,
    FadingOut,
    Removed,
}

/// Fade timing for a layer instance.
#[derive(Clone, Copy, Debug)]
pub struct FadeTimes {
    pub fade_in_sec: f64,
    pub fade_out_sec: f64,
}

impl Default for FadeTimes {
    fn default() -> Self {
        Self {
            fade_in_sec: LAYER_FADE_IN_SEC,
            fade_out_sec: LAYER_FADE_OUT_SEC,
        }
    }
}

pub struct Layer {
    id: LayerId,
    kind: LayerKind,
    sources: SmallVec<[ToneSource; 3]>,
    sequence: Vec<FrequencySet>,
    index: usize,
    fade: FadeState,
    fade_started_at: f64,
    // Fade factor at the moment fade-out began (a layer can leave mid fade-in)
    fade_out_from: f32,
    times: FadeTimes,
}

impl Layer {
    /// Create every tone of the layer, silent, tuned to the first step.
    pub fn spawn<B: ToneBackend>(
        backend: &mut B,
        id: LayerId,
        kind: LayerKind,
        semitones: i32,
        times: FadeTimes,
    ) -> BackendResult<Self> {
        let sequence = kind.sequence(semitones);
        let sources = spawn_voices(backend, kind.voices(), sequence.first())?;
        Ok(Self {
            id,
            kind,
            sources,
            index: 1 % sequence.len().max(1),
            sequence,
            fade: FadeState::FadingIn,
            fade_started_at: backend.now(),
            fade_out_from: 0.0,
            times,
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn fade_state(&self) -> FadeState {
        self.fade
    }

    pub fn sequence_index(&self) -> usize {
        self.index
    }

    pub fn sources(&self) -> &[ToneSource] {
        &self.sources
    }

    pub fn sequence(&self) -> &[FrequencySet] {
        &self.sequence
    }

    pub fn times(&self) -> FadeTimes {
        self.times
    }

    /// 0..1 multiplier from the fade envelope at `now`.
    pub fn fade_factor(&self, now: f64) -> f32 {
        let progress = |len: f64| {
            if len <= 0.0 {
                1.0
            } else {
                ((now - self.fade_started_at) / len).clamp(0.0, 1.0) as f32
            }
        };
        match self.fade {
            FadeState::FadingIn => progress(self.times.fade_in_sec),
            FadeState::Steady => 1.0,
            FadeState::FadingOut => self.fade_out_from * (1.0 - progress(self.times.fade_out_sec)),
            FadeState::Removed => 0.0,
        }
    }

    /// Current layer gain: tension curve times fade envelope.
    pub fn gain_at(&self, tension: f32, now: f64) -> f32 {
        (self.kind.target_gain(tension) * self.fade_factor(now)).clamp(0.0, 1.0)
    }

    /// Push the current gain to every tone, ramping over `horizon` seconds.
    pub fn apply_gain<B: ToneBackend>(
        &mut self,
        backend: &mut B,
        tension: f32,
        now: f64,
        horizon: f64,
    ) {
        let gain = self.gain_at(tension, now);
        let voices = self.kind.voices();
        for (tone, v) in self.sources.iter_mut().zip(voices) {
            tone.ramp_amplitude(backend, gain * v.weight, GainRamp::Linear, now + horizon);
        }
    }

    /// `fading-in -> steady`. Returns false from any other state.
    pub fn finish_fade_in(&mut self) -> bool {
        if self.fade != FadeState::FadingIn {
            return false;
        }
        self.fade = FadeState::Steady;
        true
    }

    /// `fading-in | steady -> fading-out`. Returns false if already leaving.
    pub fn begin_fade_out(&mut self, now: f64) -> bool {
        match self.fade {
            FadeState::FadingIn | FadeState::Steady => {
                self.fade_out_from = self.fade_factor(now);
                self.fade = FadeState::FadingOut;
                self.fade_started_at = now;
                true
            }
            FadeState::FadingOut | FadeState::Removed => false,
        }
    }

    /// Glide every tone to the current step, then move to the next step.
    pub fn advance_note<B: ToneBackend>(&mut self, backend: &mut B, now: f64, glide_tau: f64) {
        if self.fade == FadeState::Removed || self.sequence.is_empty() {
            return;
        }
        let step = &self.sequence[self.index];
        for (tone, hz) in self.sources.iter_mut().zip(step.iter()) {
            tone.glide_to(backend, *hz, now, glide_tau);
        }
        self.index = (self.index + 1) % self.sequence.len();
    }

    /// Stop and release every tone. Terminal.
    pub fn teardown<B: ToneBackend>(&mut self, backend: &mut B, now: f64) {
        for tone in self.sources.iter_mut() {
            tone.stop(backend, now);
        }
        self.fade = FadeState::Removed;
    }

    pub fn live_tone_count(&self) -> usize {
        self.sources.iter().filter(|t| !t.is_stopped()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OfflineBackend;

    fn spawn(b: &mut OfflineBackend, kind: LayerKind) -> Layer {
        Layer::spawn(b, LayerId(1), kind, 0, FadeTimes::default()).unwrap()
    }

    #[test]
    fn voices_and_sequences_line_up() {
        for kind in LayerKind::ALL {
            let n = kind.voices().len();
            assert!(!kind.notes().is_empty());
            for step in kind.notes() {
                assert_eq!(step.len(), n, "{kind} step width differs from voice count");
            }
        }
    }

    #[test]
    fn target_gain_is_clamped_and_zero_at_threshold() {
        for kind in LayerKind::THRESHOLD {
            let th = kind.threshold().unwrap();
            assert_eq!(kind.target_gain(th), 0.0);
            assert_eq!(kind.target_gain(th - 0.1), 0.0, "{kind} went negative");
            assert!(kind.target_gain(1.0) > 0.0);
            assert!(kind.target_gain(5.0) <= kind.target_gain(1.0) + 1e-6);
        }
        assert!(LayerKind::Base.target_gain(0.0) > 0.0);
    }

    #[test]
    fn fade_in_ramps_linearly_then_steady() {
        let mut b = OfflineBackend::new();
        let mut layer = spawn(&mut b, LayerKind::Battle);
        assert_eq!(layer.fade_state(), FadeState::FadingIn);
        assert_eq!(layer.fade_factor(0.0), 0.0);
        assert!((layer.fade_factor(0.25) - 0.5).abs() < 1e-6);
        assert!(layer.finish_fade_in());
        assert_eq!(layer.fade_state(), FadeState::Steady);
        assert!(!layer.finish_fade_in());
        assert_eq!(layer.fade_factor(10.0), 1.0);
    }

    #[test]
    fn fade_out_from_partial_fade_in_starts_at_current_level() {
        let mut b = OfflineBackend::new();
        let mut layer = spawn(&mut b, LayerKind::Intense);
        assert!(layer.begin_fade_out(0.25));
        assert!(!layer.begin_fade_out(0.3), "double fade-out accepted");
        assert!(!layer.finish_fade_in(), "fade-in completed while fading out");
        assert!((layer.fade_factor(0.25) - 0.5).abs() < 1e-6);
        assert!((layer.fade_factor(0.5) - 0.25).abs() < 1e-6);
        assert_eq!(layer.fade_factor(0.75), 0.0);
    }

    #[test]
    fn advance_cycles_through_sequence() {
        let mut b = OfflineBackend::new();
        let mut layer = spawn(&mut b, LayerKind::Base);
        let len = layer.sequence().len();
        assert_eq!(layer.sequence_index(), 1);
        for _ in 0..len {
            layer.advance_note(&mut b, 0.0, NOTE_GLIDE_TAU_SEC);
        }
        assert_eq!(layer.sequence_index(), 1);
        let expected = layer.sequence()[0][0];
        assert!((layer.sources()[0].frequency_hz() - expected).abs() < 1e-3);
    }

    #[test]
    fn failed_spawn_releases_partial_tones() {
        struct FailSecond(OfflineBackend, u32);
        impl ToneBackend for FailSecond {
            fn create_tone(
                &mut self,
                w: Waveform,
                hz: f32,
            ) -> BackendResult<crate::backend::ToneHandle> {
                self.1 += 1;
                if self.1 == 2 {
                    return Err(crate::backend::BackendError::Rejected("full".into()));
                }
                self.0.create_tone(w, hz)
            }
            fn set_gain(
                &mut self,
                h: crate::backend::ToneHandle,
                v: f32,
                r: GainRamp,
                at: f64,
            ) -> BackendResult<()> {
                self.0.set_gain(h, v, r, at)
            }
            fn set_frequency(
                &mut self,
                h: crate::backend::ToneHandle,
                hz: f32,
                at: f64,
                tau: f64,
            ) -> BackendResult<()> {
                self.0.set_frequency(h, hz, at, tau)
            }
            fn stop(&mut self, h: crate::backend::ToneHandle, at: f64) -> BackendResult<()> {
                self.0.stop(h, at)
            }
            fn set_master_gain(&mut self, v: f32) {
                self.0.set_master_gain(v)
            }
            fn now(&self) -> f64 {
                self.0.now()
            }
        }
        let mut b = FailSecond(OfflineBackend::new(), 0);
        let res = Layer::spawn(&mut b, LayerId(7), LayerKind::Extreme, 0, FadeTimes::default());
        assert!(res.is_err());
        assert_eq!(b.0.live_tone_count(), 0);
    }

    #[test]
    fn teardown_stops_everything() {
        let mut b = OfflineBackend::new();
        let mut layer = spawn(&mut b, LayerKind::Extreme);
        assert_eq!(layer.live_tone_count(), 3);
        layer.teardown(&mut b, 0.0);
        assert_eq!(layer.fade_state(), FadeState::Removed);
        assert_eq!(layer.live_tone_count(), 0);
        assert_eq!(b.live_tone_count(), 0);
    }
}
