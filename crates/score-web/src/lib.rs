#![cfg(target_arch = "wasm32")]
//! WebAudio front-end for the adaptive score.
//!
//! The game creates one `AdaptiveScore` after a user gesture and calls into it
//! from its own loop. Beats, notes and fades run from a ~60 Hz interval timer
//! owned by the score, so they keep going when the tab throttles animation
//! frames.

mod audio;

use std::cell::RefCell;
use std::rc::Rc;

use score_core::MusicEngine;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys as web;

use crate::audio::WebAudioBackend;

const PUMP_INTERVAL_MS: i32 = 16;

type Engine = MusicEngine<WebAudioBackend>;

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("score-web ready");
    Ok(())
}

#[wasm_bindgen]
pub struct AdaptiveScore {
    engine: Rc<RefCell<Engine>>,
    pump: Option<(i32, Closure<dyn FnMut()>)>,
}

#[wasm_bindgen]
impl AdaptiveScore {
    /// Build the audio graph. Without WebAudio the score stays silent and
    /// every call is a no-op.
    #[wasm_bindgen(constructor)]
    pub fn new() -> AdaptiveScore {
        let backend = WebAudioBackend::new();
        if let Ok(b) = &backend {
            b.resume();
        }
        let engine = Rc::new(RefCell::new(MusicEngine::from_backend(backend)));
        let pump = match start_pump(engine.clone()) {
            Ok(p) => Some(p),
            Err(e) => {
                log::error!("music timer error: {:?}", e);
                None
            }
        };
        AdaptiveScore { engine, pump }
    }

    #[wasm_bindgen(js_name = updateTension)]
    pub fn update_tension(&self, level: f32) {
        self.engine.borrow_mut().update_tension(level);
    }

    #[wasm_bindgen(js_name = queueKillAccent)]
    pub fn queue_kill_accent(&self, category: &str, intensity: f32) {
        self.engine.borrow_mut().queue_kill_accent(category, intensity);
    }

    #[wasm_bindgen(js_name = startBackgroundMusic)]
    pub fn start_background_music(&self, level: u32) {
        self.resume();
        self.engine.borrow_mut().start_background_music(level);
    }

    #[wasm_bindgen(js_name = startCarrierMusic)]
    pub fn start_carrier_music(&self) {
        self.resume();
        self.engine.borrow_mut().start_carrier_music();
    }

    #[wasm_bindgen(js_name = startVictoryMusic)]
    pub fn start_victory_music(&self) {
        self.resume();
        self.engine.borrow_mut().start_victory_music();
    }

    #[wasm_bindgen(js_name = stopMusic)]
    pub fn stop_music(&self) {
        self.engine.borrow_mut().stop_music();
    }

    #[wasm_bindgen(js_name = setMusicEnabled)]
    pub fn set_music_enabled(&self, enabled: bool) {
        self.engine.borrow_mut().set_music_enabled(enabled);
    }

    #[wasm_bindgen(js_name = setMusicVolume)]
    pub fn set_music_volume(&self, volume: f32) {
        self.engine.borrow_mut().set_music_volume(volume);
    }

    #[wasm_bindgen(getter)]
    pub fn tension(&self) -> f32 {
        self.engine.borrow().tension()
    }

    #[wasm_bindgen(getter, js_name = tempoBpm)]
    pub fn tempo_bpm(&self) -> f64 {
        self.engine.borrow().tempo_bpm()
    }

    #[wasm_bindgen(getter)]
    pub fn mode(&self) -> String {
        self.engine.borrow().mode().to_string()
    }

    /// One-line summary for the debug overlay.
    pub fn snapshot(&self) -> String {
        self.engine.borrow().snapshot().to_string()
    }
}

impl AdaptiveScore {
    fn resume(&self) {
        if let Some(b) = self.engine.borrow().backend() {
            b.resume();
        }
    }
}

impl Default for AdaptiveScore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AdaptiveScore {
    fn drop(&mut self) {
        if let Some((id, _closure)) = self.pump.take() {
            if let Some(w) = web::window() {
                w.clear_interval_with_handle(id);
            }
        }
        self.engine.borrow_mut().stop_music();
    }
}

fn start_pump(engine: Rc<RefCell<Engine>>) -> anyhow::Result<(i32, Closure<dyn FnMut()>)> {
    let window = web::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
    let closure = Closure::wrap(Box::new(move || {
        // Skip a tick rather than panic if a call into the score is in flight.
        if let Ok(mut e) = engine.try_borrow_mut() {
            e.run_due();
        }
    }) as Box<dyn FnMut()>);
    let id = window
        .set_interval_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            PUMP_INTERVAL_MS,
        )
        .map_err(|e| anyhow::anyhow!(format!("{:?}", e)))?;
    Ok((id, closure))
}
