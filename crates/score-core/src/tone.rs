use crate::backend::{BackendError, BackendResult, GainRamp, ToneBackend, ToneHandle, Waveform};

/// Lifecycle of a single oscillator. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneLifecycle {
    Created,
    Running,
    Stopped,
}

/// One continuous oscillator plus its amplitude envelope.
#[derive(Debug)]
pub struct ToneSource {
    handle: ToneHandle,
    waveform: Waveform,
    frequency_hz: f32,
    amplitude: f32,
    lifecycle: ToneLifecycle,
}

impl ToneSource {
    /// Ask the backend for a new tone. It starts silent.
    pub fn create<B: ToneBackend>(
        backend: &mut B,
        waveform: Waveform,
        frequency_hz: f32,
    ) -> BackendResult<Self> {
        let frequency_hz = sanitize_frequency(frequency_hz);
        let handle = backend.create_tone(waveform, frequency_hz)?;
        Ok(Self {
            handle,
            waveform,
            frequency_hz,
            amplitude: 0.0,
            lifecycle: ToneLifecycle::Created,
        })
    }

    pub fn handle(&self) -> ToneHandle {
        self.handle
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn lifecycle(&self) -> ToneLifecycle {
        self.lifecycle
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle == ToneLifecycle::Stopped
    }

    /// Ramp the amplitude to `value` by time `at`.
    pub fn ramp_amplitude<B: ToneBackend>(
        &mut self,
        backend: &mut B,
        value: f32,
        ramp: GainRamp,
        at: f64,
    ) {
        if self.is_stopped() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        if ignore_stale(backend.set_gain(self.handle, value, ramp, at)) {
            self.amplitude = value;
            self.lifecycle = ToneLifecycle::Running;
        }
    }

    /// Glide toward `frequency_hz` instead of jumping, to avoid clicks.
    pub fn glide_to<B: ToneBackend>(
        &mut self,
        backend: &mut B,
        frequency_hz: f32,
        at: f64,
        time_constant: f64,
    ) {
        if self.is_stopped() {
            return;
        }
        let frequency_hz = sanitize_frequency(frequency_hz);
        if ignore_stale(backend.set_frequency(self.handle, frequency_hz, at, time_constant)) {
            self.frequency_hz = frequency_hz;
        }
    }

    /// Stop and release the tone. Safe to call more than once.
    pub fn stop<B: ToneBackend>(&mut self, backend: &mut B, at: f64) {
        if self.is_stopped() {
            return;
        }
        self.lifecycle = ToneLifecycle::Stopped;
        self.amplitude = 0.0;
        ignore_stale(backend.stop(self.handle, at));
    }
}

fn sanitize_frequency(hz: f32) -> f32 {
    if hz.is_finite() && hz > 0.0 {
        hz
    } else {
        1.0
    }
}

/// Teardown races make stale handles routine; swallow them here.
/// Returns whether the call went through.
fn ignore_stale(result: BackendResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(BackendError::StaleHandle(h)) => {
            log::trace!("ignoring stale tone {:?}", h);
            false
        }
        Err(e) => {
            log::debug!("tone update failed: {}", e);
            false
        }
    }
}
