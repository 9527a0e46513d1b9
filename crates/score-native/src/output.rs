use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use score_core::{BackendError, BackendResult, GainRamp, ToneBackend, ToneHandle, Waveform};

use crate::mixer::Mixer;

/// Native tone backend: the engine writes into a shared [`Mixer`] and the
/// cpal callback renders it. Without an output device the mixer runs headless
/// and its clock is advanced by [`CpalBackend::render_headless`].
pub struct CpalBackend {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<cpal::Stream>,
}

impl CpalBackend {
    /// Open the default output device.
    pub fn open() -> BackendResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(BackendError::Unavailable)?;
        let supported = device
            .default_output_config()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        log::info!(
            "audio out: {} Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0 as f32)));
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&mixer)),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&mixer)),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&mixer)),
            other => {
                return Err(BackendError::Rejected(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| BackendError::Rejected(e.to_string()))?;
        stream
            .play()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        Ok(Self {
            mixer,
            stream: Some(stream),
        })
    }

    /// Mixer with no device attached.
    pub fn headless(sample_rate: f32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new(sample_rate))),
            stream: None,
        }
    }

    pub fn is_headless(&self) -> bool {
        self.stream.is_none()
    }

    /// Render and discard `seconds` of audio so the clock moves without a device.
    pub fn render_headless(&self, seconds: f64) {
        if let Ok(mut m) = self.mixer.lock() {
            let n = (seconds * m.sample_rate() as f64).round() as usize;
            for _ in 0..n {
                m.next_sample();
            }
        }
    }

    fn with_mixer<R>(&self, f: impl FnOnce(&mut Mixer) -> BackendResult<R>) -> BackendResult<R> {
        let mut guard = self.mixer.lock().map_err(|_| BackendError::Unavailable)?;
        f(&mut guard)
    }
}

impl ToneBackend for CpalBackend {
    fn create_tone(&mut self, waveform: Waveform, frequency_hz: f32) -> BackendResult<ToneHandle> {
        self.with_mixer(|m| m.create_tone(waveform, frequency_hz))
    }

    fn set_gain(
        &mut self,
        handle: ToneHandle,
        value: f32,
        ramp: GainRamp,
        at: f64,
    ) -> BackendResult<()> {
        self.with_mixer(|m| m.set_gain(handle, value, ramp, at))
    }

    fn set_frequency(
        &mut self,
        handle: ToneHandle,
        frequency_hz: f32,
        at: f64,
        time_constant: f64,
    ) -> BackendResult<()> {
        self.with_mixer(|m| m.set_frequency(handle, frequency_hz, at, time_constant))
    }

    fn stop(&mut self, handle: ToneHandle, at: f64) -> BackendResult<()> {
        self.with_mixer(|m| m.stop(handle, at))
    }

    fn set_master_gain(&mut self, value: f32) {
        let _ = self.with_mixer(|m| {
            m.set_master_gain(value);
            Ok(())
        });
    }

    fn now(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.now())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            match mixer.lock() {
                Ok(mut m) => m.render(&mut scratch, channels),
                Err(_) => scratch.fill(0.0),
            }
            for (out, s) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*s);
            }
        },
        |err| log::error!("audio stream error: {err}"),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_clock_advances_only_when_rendered() {
        let b = CpalBackend::headless(8000.0);
        assert!(b.is_headless());
        assert_eq!(b.now(), 0.0);
        b.render_headless(0.25);
        assert!((b.now() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn headless_backend_drives_tones() {
        let mut b = CpalBackend::headless(8000.0);
        let h = b.create_tone(Waveform::Sine, 220.0).unwrap();
        b.set_gain(h, 0.2, GainRamp::Set, 0.0).unwrap();
        b.stop(h, 0.1).unwrap();
        b.render_headless(0.2);
        assert!(b.set_gain(h, 0.1, GainRamp::Set, 0.3).is_err());
    }
}
