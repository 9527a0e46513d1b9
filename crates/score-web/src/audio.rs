use fnv::FnvHashMap;
use score_core::{BackendError, BackendResult, GainRamp, ToneBackend, ToneHandle, Waveform};
use web_sys as web;

// Exponential ramps cannot target zero in WebAudio
const MIN_EXP_GAIN: f32 = 1.0e-4;
// Smoothing on master volume changes to avoid zipper noise
const MASTER_GAIN_TAU_SEC: f64 = 0.02;

fn rejected(label: &str, e: wasm_bindgen::JsValue) -> BackendError {
    BackendError::Rejected(format!("{}: {:?}", label, e))
}

fn create_gain(
    audio_ctx: &web::AudioContext,
    value: f32,
    label: &str,
) -> BackendResult<web::GainNode> {
    match web::GainNode::new(audio_ctx) {
        Ok(g) => {
            g.gain().set_value(value);
            Ok(g)
        }
        Err(e) => {
            log::error!("{} GainNode error: {:?}", label, e);
            Err(rejected(label, e))
        }
    }
}

fn oscillator_type(waveform: Waveform) -> web::OscillatorType {
    match waveform {
        Waveform::Sine => web::OscillatorType::Sine,
        Waveform::Square => web::OscillatorType::Square,
        Waveform::Saw => web::OscillatorType::Sawtooth,
        Waveform::Triangle => web::OscillatorType::Triangle,
    }
}

struct WebTone {
    osc: web::OscillatorNode,
    gain: web::GainNode,
    stop_at: Option<f64>,
}

/// WebAudio tone backend: every tone is `OscillatorNode -> GainNode -> master`.
pub struct WebAudioBackend {
    audio_ctx: web::AudioContext,
    master_gain: web::GainNode,
    tones: FnvHashMap<ToneHandle, WebTone>,
    next_handle: u32,
}

impl WebAudioBackend {
    pub fn new() -> BackendResult<Self> {
        let audio_ctx = web::AudioContext::new().map_err(|e| {
            log::error!("AudioContext error: {:?}", e);
            BackendError::Unavailable
        })?;
        let master_gain = create_gain(&audio_ctx, 0.0, "Master")?;
        master_gain
            .connect_with_audio_node(&audio_ctx.destination())
            .map_err(|e| rejected("master connect", e))?;
        Ok(Self {
            audio_ctx,
            master_gain,
            tones: FnvHashMap::default(),
            next_handle: 0,
        })
    }

    /// Browsers keep a fresh context suspended until a user gesture.
    pub fn resume(&self) {
        if self.audio_ctx.state() == web::AudioContextState::Suspended {
            let _ = self.audio_ctx.resume();
        }
    }

    /// Disconnect nodes whose scheduled stop has passed.
    fn prune(&mut self) {
        let now = self.audio_ctx.current_time();
        self.tones.retain(|_, t| match t.stop_at {
            Some(at) if at <= now => {
                let _ = t.gain.disconnect();
                false
            }
            _ => true,
        });
    }

    fn live(&self, handle: ToneHandle) -> BackendResult<&WebTone> {
        let now = self.audio_ctx.current_time();
        match self.tones.get(&handle) {
            Some(t) if t.stop_at.map_or(true, |at| at > now) => Ok(t),
            _ => Err(BackendError::StaleHandle(handle)),
        }
    }
}

impl ToneBackend for WebAudioBackend {
    fn create_tone(&mut self, waveform: Waveform, frequency_hz: f32) -> BackendResult<ToneHandle> {
        self.prune();
        let osc =
            web::OscillatorNode::new(&self.audio_ctx).map_err(|e| rejected("oscillator", e))?;
        osc.set_type(oscillator_type(waveform));
        osc.frequency().set_value(frequency_hz);
        let gain = create_gain(&self.audio_ctx, 0.0, "tone")?;
        osc.connect_with_audio_node(&gain)
            .map_err(|e| rejected("tone connect", e))?;
        gain.connect_with_audio_node(&self.master_gain)
            .map_err(|e| rejected("tone connect", e))?;
        osc.start_with_when(self.audio_ctx.current_time())
            .map_err(|e| rejected("tone start", e))?;

        let handle = ToneHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.tones.insert(
            handle,
            WebTone {
                osc,
                gain,
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
        let param = self.live(handle)?.gain.gain();
        let res = match ramp {
            GainRamp::Set => param.set_value_at_time(value, at),
            GainRamp::Linear => param.linear_ramp_to_value_at_time(value, at),
            GainRamp::Exponential => {
                param.exponential_ramp_to_value_at_time(value.max(MIN_EXP_GAIN), at)
            }
        };
        res.map(|_| ()).map_err(|e| rejected("gain automation", e))
    }

    fn set_frequency(
        &mut self,
        handle: ToneHandle,
        frequency_hz: f32,
        at: f64,
        time_constant: f64,
    ) -> BackendResult<()> {
        self.live(handle)?
            .osc
            .frequency()
            .set_target_at_time(frequency_hz, at, time_constant.max(1.0e-3))
            .map(|_| ())
            .map_err(|e| rejected("frequency glide", e))
    }

    fn stop(&mut self, handle: ToneHandle, at: f64) -> BackendResult<()> {
        let now = self.audio_ctx.current_time();
        let tone = self
            .tones
            .get_mut(&handle)
            .ok_or(BackendError::StaleHandle(handle))?;
        if matches!(tone.stop_at, Some(t) if t <= now) {
            return Err(BackendError::StaleHandle(handle));
        }
        // A later stop() call replaces a pending one.
        tone.osc
            .stop_with_when(at.max(now))
            .map_err(|e| rejected("tone stop", e))?;
        tone.stop_at = Some(at.max(now));
        Ok(())
    }

    fn set_master_gain(&mut self, value: f32) {
        let now = self.audio_ctx.current_time();
        let _ = self
            .master_gain
            .gain()
            .set_target_at_time(value.clamp(0.0, 1.0), now, MASTER_GAIN_TAU_SEC);
    }

    fn now(&self) -> f64 {
        self.audio_ctx.current_time()
    }
}

impl Drop for WebAudioBackend {
    fn drop(&mut self) {
        let _ = self.master_gain.disconnect();
        let _ = self.audio_ctx.close();
    }
}
