//! Software mixer implementing the tone capability set natively.
//!
//! Gain automation follows WebAudio's rules: a ramp runs from the previous
//! automation point to its own end time, and a set holds its value from its
//! start. Frequency glides approach their target exponentially with the given
//! time constant. The clock is the number of rendered samples.

use std::f32::consts::PI;

use fnv::FnvHashMap;
use score_core::{BackendError, BackendResult, GainRamp, ToneBackend, ToneHandle, Waveform};

const TWO_PI: f32 = 2.0 * PI;
// Exponential ramps are undefined through zero
const MIN_EXP_GAIN: f32 = 1.0e-4;

pub fn render_wave_sample(phase: f32, wave: Waveform) -> f32 {
    let saw = || {
        let t = phase / TWO_PI;
        (t - t.floor()) * 2.0 - 1.0
    };
    match wave {
        Waveform::Sine => phase.sin(),
        Waveform::Square => {
            if phase.sin() >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Saw => saw(),
        Waveform::Triangle => ((2.0 / PI) * phase.sin().asin()).clamp(-1.0, 1.0),
    }
}

/// Automation timeline for one gain parameter.
#[derive(Clone, Debug)]
struct GainLane {
    // Last automation point already reached: (time, value)
    anchor: (f64, f32),
    events: Vec<(f64, f32, GainRamp)>,
}

impl GainLane {
    fn new(start: f64) -> Self {
        Self {
            anchor: (start, 0.0),
            events: Vec::new(),
        }
    }

    fn push(&mut self, at: f64, value: f32, ramp: GainRamp) {
        let pos = self.events.partition_point(|(t, _, _)| *t <= at);
        self.events.insert(pos, (at, value, ramp));
    }

    fn value_at(&mut self, t: f64) -> f32 {
        while let Some(&(at, value, _)) = self.events.first() {
            if at > t {
                break;
            }
            self.anchor = (at, value);
            self.events.remove(0);
        }
        let (t0, v0) = self.anchor;
        let Some(&(t1, v1, ramp)) = self.events.first() else {
            return v0;
        };
        let span = t1 - t0;
        if span <= 0.0 {
            return v0;
        }
        let x = ((t - t0) / span).clamp(0.0, 1.0) as f32;
        match ramp {
            GainRamp::Set => v0,
            GainRamp::Linear => v0 + (v1 - v0) * x,
            GainRamp::Exponential => {
                let a = v0.max(MIN_EXP_GAIN);
                let b = v1.max(MIN_EXP_GAIN);
                a * (b / a).powf(x)
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Glide {
    from_hz: f32,
    to_hz: f32,
    at: f64,
    tau: f64,
}

impl Glide {
    fn value_at(&self, t: f64) -> f32 {
        if t < self.at {
            return self.from_hz;
        }
        let k = (-(t - self.at) / self.tau.max(1.0e-4)).exp() as f32;
        self.to_hz + (self.from_hz - self.to_hz) * k
    }
}

#[derive(Clone, Debug)]
struct MixTone {
    wave: Waveform,
    phase: f32,
    frequency_hz: f32,
    glide: Option<Glide>,
    gain: GainLane,
    stop_at: Option<f64>,
}

/// All tones currently held by the native output.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: f32,
    samples: u64,
    master_gain: f32,
    master_target: f32,
    tones: FnvHashMap<ToneHandle, MixTone>,
    next_handle: u32,
}

impl Mixer {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate: sample_rate.max(1.0),
            samples: 0,
            master_gain: 0.0,
            master_target: 0.0,
            tones: FnvHashMap::default(),
            next_handle: 0,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn tone_count(&self) -> usize {
        self.tones.len()
    }

    /// Current gain of a tone's amplitude automation.
    pub fn gain_of(&mut self, handle: ToneHandle) -> Option<f32> {
        let now = self.now();
        self.tones.get_mut(&handle).map(|t| t.gain.value_at(now))
    }

    pub fn frequency_of(&self, handle: ToneHandle) -> Option<f32> {
        let now = self.now();
        self.tones
            .get(&handle)
            .map(|t| t.glide.map_or(t.frequency_hz, |g| g.value_at(now)))
    }

    /// Produce one mono sample and advance the clock.
    pub fn next_sample(&mut self) -> f32 {
        let now = self.now();
        let sample_rate = self.sample_rate;
        let mut mix = 0.0f32;
        self.tones.retain(|_, tone| {
            if matches!(tone.stop_at, Some(at) if now >= at) {
                return false;
            }
            let hz = tone.glide.map_or(tone.frequency_hz, |g| g.value_at(now));
            let amp = tone.gain.value_at(now);
            mix += render_wave_sample(tone.phase, tone.wave) * amp;
            tone.phase += TWO_PI * hz / sample_rate;
            if tone.phase > TWO_PI {
                tone.phase -= TWO_PI;
            }
            true
        });
        // One-pole smoothing on master volume changes
        self.master_gain += (self.master_target - self.master_gain) * 0.001;
        self.samples += 1;
        (mix * self.master_gain).tanh()
    }

    /// Fill an interleaved buffer, duplicating the mono mix on every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let s = self.next_sample();
            for slot in frame.iter_mut() {
                *slot = s;
            }
        }
    }

    fn live_mut(&mut self, handle: ToneHandle) -> BackendResult<&mut MixTone> {
        let now = self.now();
        match self.tones.get_mut(&handle) {
            Some(t) if t.stop_at.map_or(true, |at| at > now) => Ok(t),
            _ => Err(BackendError::StaleHandle(handle)),
        }
    }
}

impl ToneBackend for Mixer {
    fn create_tone(&mut self, waveform: Waveform, frequency_hz: f32) -> BackendResult<ToneHandle> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(BackendError::Rejected(format!(
                "bad frequency {}",
                frequency_hz
            )));
        }
        let handle = ToneHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        let now = self.now();
        self.tones.insert(
            handle,
            MixTone {
                wave: waveform,
                phase: 0.0,
                frequency_hz,
                glide: None,
                gain: GainLane::new(now),
                stop_at: None,
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
        self.live_mut(handle)?.gain.push(at, value, ramp);
        Ok(())
    }

    fn set_frequency(
        &mut self,
        handle: ToneHandle,
        frequency_hz: f32,
        at: f64,
        time_constant: f64,
    ) -> BackendResult<()> {
        let now = self.now();
        let tone = self.live_mut(handle)?;
        let from_hz = tone.glide.map_or(tone.frequency_hz, |g| g.value_at(now));
        tone.frequency_hz = from_hz;
        tone.glide = Some(Glide {
            from_hz,
            to_hz: frequency_hz,
            at,
            tau: time_constant,
        });
        Ok(())
    }

    fn stop(&mut self, handle: ToneHandle, at: f64) -> BackendResult<()> {
        let now = self.now();
        let tone = self
            .tones
            .get_mut(&handle)
            .ok_or(BackendError::StaleHandle(handle))?;
        if matches!(tone.stop_at, Some(t) if t <= now) {
            return Err(BackendError::StaleHandle(handle));
        }
        tone.stop_at = Some(at);
        Ok(())
    }

    fn set_master_gain(&mut self, value: f32) {
        self.master_target = value.clamp(0.0, 1.0);
    }

    fn now(&self) -> f64 {
        self.samples as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn run(m: &mut Mixer, samples: usize) {
        for _ in 0..samples {
            m.next_sample();
        }
    }

    #[test]
    fn clock_counts_rendered_samples() {
        let mut m = Mixer::new(SR);
        assert_eq!(m.now(), 0.0);
        let mut buf = vec![0.0f32; 200];
        m.render(&mut buf, 2);
        assert!((m.now() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn linear_ramp_runs_from_previous_point() {
        let mut m = Mixer::new(SR);
        let h = m.create_tone(Waveform::Sine, 110.0).unwrap();
        m.set_gain(h, 0.0, GainRamp::Set, 0.0).unwrap();
        m.set_gain(h, 0.5, GainRamp::Linear, 0.1).unwrap();
        run(&mut m, 50);
        let g = m.gain_of(h).unwrap();
        assert!((g - 0.25).abs() < 0.01, "halfway gain was {g}");
        run(&mut m, 100);
        assert!((m.gain_of(h).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn exponential_ramp_decays_toward_floor() {
        let mut m = Mixer::new(SR);
        let h = m.create_tone(Waveform::Square, 100.0).unwrap();
        m.set_gain(h, 0.35, GainRamp::Set, 0.0).unwrap();
        m.set_gain(h, 0.001, GainRamp::Exponential, 0.1).unwrap();
        run(&mut m, 50);
        let mid = m.gain_of(h).unwrap();
        // geometric mean of the endpoints
        assert!((mid - (0.35f32 * 0.001).sqrt()).abs() < 2e-3);
        assert!(mid < 0.35 / 2.0);
    }

    #[test]
    fn glide_approaches_target() {
        let mut m = Mixer::new(SR);
        let h = m.create_tone(Waveform::Triangle, 220.0).unwrap();
        m.set_frequency(h, 440.0, 0.0, 0.05).unwrap();
        run(&mut m, 50);
        let f = m.frequency_of(h).unwrap();
        assert!(f > 350.0 && f < 440.0, "glide at one tau was {f}");
        run(&mut m, 500);
        assert!((m.frequency_of(h).unwrap() - 440.0).abs() < 0.1);
    }

    #[test]
    fn scheduled_stop_releases_tone() {
        let mut m = Mixer::new(SR);
        let h = m.create_tone(Waveform::Saw, 150.0).unwrap();
        m.stop(h, 0.1).unwrap();
        // a pending stop may be moved
        m.stop(h, 0.05).unwrap();
        run(&mut m, 60);
        assert_eq!(m.tone_count(), 0);
        assert_eq!(m.stop(h, 0.2), Err(BackendError::StaleHandle(h)));
        assert!(m.set_gain(h, 0.1, GainRamp::Set, 0.2).is_err());
    }

    #[test]
    fn output_is_soft_clipped_and_scaled_by_master() {
        let mut m = Mixer::new(SR);
        for _ in 0..8 {
            let h = m.create_tone(Waveform::Square, 50.0).unwrap();
            m.set_gain(h, 1.0, GainRamp::Set, 0.0).unwrap();
        }
        run(&mut m, 10);
        assert!(m.next_sample().abs() < 0.01, "master starts at zero");
        m.set_master_gain(1.0);
        run(&mut m, 10_000);
        let s = m.next_sample();
        assert!(s.abs() <= 1.0);
        assert!(s.abs() > 0.9);
    }

    #[test]
    fn invalid_frequency_is_rejected() {
        let mut m = Mixer::new(SR);
        assert!(matches!(
            m.create_tone(Waveform::Sine, f32::NAN),
            Err(BackendError::Rejected(_))
        ));
    }

    #[test]
    fn triangle_peaks_mid_cycle_and_is_symmetric() {
        let tri = |p: f32| render_wave_sample(p, Waveform::Triangle);
        assert!((tri(PI / 2.0) - 1.0).abs() < 1e-3);
        assert!((tri(3.0 * PI / 2.0) + 1.0).abs() < 1e-3);
        assert!(tri(0.0).abs() < 1e-3);
        assert!((tri(PI / 4.0) - 0.5).abs() < 1e-3, "triangle is linear between extremes");
        for i in 1..16 {
            let x = i as f32 * PI / 32.0;
            assert!(
                (tri(PI / 2.0 - x) - tri(PI / 2.0 + x)).abs() < 1e-3,
                "asymmetric around the peak at offset {x}"
            );
        }
    }

    #[test]
    fn wave_shapes_stay_in_range() {
        for wave in [Waveform::Sine, Waveform::Square, Waveform::Saw, Waveform::Triangle] {
            for i in 0..64 {
                let s = render_wave_sample(i as f32 * TWO_PI / 64.0, wave);
                assert!((-1.0..=1.0).contains(&s), "{wave:?} out of range: {s}");
            }
        }
    }
}
