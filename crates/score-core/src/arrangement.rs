//! Fixed, non-adaptive three-oscillator pieces (carrier fight, victory).
//!
//! They share the layer building blocks but have their own tempo and notes
//! and never look at tension.

use smallvec::SmallVec;

use crate::backend::{BackendResult, GainRamp, ToneBackend, Waveform};
use crate::constants::*;
use crate::layer::{spawn_voices, voice, FrequencySet, LayerVoice};
use crate::music::midi_to_hz;
use crate::tone::ToneSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrangementKind {
    Carrier,
    Victory,
}

const CARRIER_VOICES: &[LayerVoice] = &[
    voice(Waveform::Saw, 0.7),
    voice(Waveform::Sine, 1.0),
    voice(Waveform::Square, 0.4),
];
const VICTORY_VOICES: &[LayerVoice] = &[
    voice(Waveform::Triangle, 1.0),
    voice(Waveform::Square, 0.4),
    voice(Waveform::Sine, 0.8),
];

// D minor pedal under a rising line
const CARRIER_NOTES: &[&[i32]] = &[
    &[50, 38, 62],
    &[50, 38, 65],
    &[53, 38, 64],
    &[52, 36, 60],
    &[50, 38, 62],
    &[55, 43, 67],
    &[53, 41, 65],
    &[52, 40, 64],
];
// C major fanfare
const VICTORY_NOTES: &[&[i32]] = &[
    &[60, 48, 72],
    &[64, 52, 76],
    &[67, 55, 79],
    &[72, 60, 84],
    &[65, 53, 77],
    &[69, 57, 81],
    &[67, 55, 79],
    &[72, 48, 84],
];

impl ArrangementKind {
    pub fn name(self) -> &'static str {
        match self {
            ArrangementKind::Carrier => "carrier",
            ArrangementKind::Victory => "victory",
        }
    }

    pub fn bpm(self) -> f64 {
        match self {
            ArrangementKind::Carrier => CARRIER_BPM,
            ArrangementKind::Victory => VICTORY_BPM,
        }
    }

    pub fn beat_duration(self) -> f64 {
        60.0 / self.bpm()
    }

    pub fn voices(self) -> &'static [LayerVoice] {
        match self {
            ArrangementKind::Carrier => CARRIER_VOICES,
            ArrangementKind::Victory => VICTORY_VOICES,
        }
    }

    pub fn notes(self) -> &'static [&'static [i32]] {
        match self {
            ArrangementKind::Carrier => CARRIER_NOTES,
            ArrangementKind::Victory => VICTORY_NOTES,
        }
    }
}

pub struct Arrangement {
    kind: ArrangementKind,
    sources: SmallVec<[ToneSource; 3]>,
    sequence: Vec<FrequencySet>,
    index: usize,
}

impl Arrangement {
    /// Start every voice and fade it in to the fixed arrangement level.
    pub fn spawn<B: ToneBackend>(
        backend: &mut B,
        kind: ArrangementKind,
        fade_in_sec: f64,
    ) -> BackendResult<Self> {
        let sequence: Vec<FrequencySet> = kind
            .notes()
            .iter()
            .map(|step| step.iter().map(|m| midi_to_hz(*m as f32)).collect())
            .collect();
        let mut sources = spawn_voices(backend, kind.voices(), sequence.first())?;
        let now = backend.now();
        for (tone, v) in sources.iter_mut().zip(kind.voices()) {
            tone.ramp_amplitude(backend, 0.0, GainRamp::Set, now);
            tone.ramp_amplitude(
                backend,
                ARRANGEMENT_GAIN * v.weight,
                GainRamp::Linear,
                now + fade_in_sec,
            );
        }
        Ok(Self {
            kind,
            sources,
            index: 1 % sequence.len().max(1),
            sequence,
        })
    }

    pub fn kind(&self) -> ArrangementKind {
        self.kind
    }

    pub fn sequence_index(&self) -> usize {
        self.index
    }

    pub fn sources(&self) -> &[ToneSource] {
        &self.sources
    }

    pub fn advance_note<B: ToneBackend>(&mut self, backend: &mut B, now: f64, glide_tau: f64) {
        if self.sequence.is_empty() {
            return;
        }
        let step = &self.sequence[self.index];
        for (tone, hz) in self.sources.iter_mut().zip(step.iter()) {
            tone.glide_to(backend, *hz, now, glide_tau);
        }
        self.index = (self.index + 1) % self.sequence.len();
    }

    pub fn teardown<B: ToneBackend>(&mut self, backend: &mut B, now: f64) {
        for tone in self.sources.iter_mut() {
            tone.stop(backend, now);
        }
    }

    pub fn live_tone_count(&self) -> usize {
        self.sources.iter().filter(|t| !t.is_stopped()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OfflineBackend;

    #[test]
    fn arrangements_are_three_voices() {
        for kind in [ArrangementKind::Carrier, ArrangementKind::Victory] {
            assert_eq!(kind.voices().len(), 3);
            for step in kind.notes() {
                assert_eq!(step.len(), 3, "{} step is not three notes", kind.name());
            }
        }
        assert!(ArrangementKind::Victory.bpm() != ArrangementKind::Carrier.bpm());
    }

    #[test]
    fn spawn_fades_in_and_teardown_stops() {
        let mut b = OfflineBackend::new();
        let mut a = Arrangement::spawn(&mut b, ArrangementKind::Carrier, 0.5).unwrap();
        assert_eq!(b.live_tone_count(), 3);
        let first = a.sources()[0].handle();
        let last_event = b.tone(first).unwrap().gain_events.last().copied().unwrap();
        assert_eq!(last_event.1, GainRamp::Linear);
        assert!((last_event.2 - 0.5).abs() < 1e-9);
        a.advance_note(&mut b, 0.0, NOTE_GLIDE_TAU_SEC);
        assert_eq!(a.sequence_index(), 2);
        a.teardown(&mut b, 0.0);
        assert_eq!(a.live_tone_count(), 0);
        assert_eq!(b.live_tone_count(), 0);
    }
}
