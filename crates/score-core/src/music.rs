use std::fmt;

use fnv::FnvHashMap;
use smallvec::SmallVec;

use crate::accent::{AccentDispatcher, AccentRequest, RenderedAccent};
use crate::arrangement::{Arrangement, ArrangementKind};
use crate::backend::{BackendResult, ToneBackend};
use crate::beat::BeatClock;
use crate::constants::*;
use crate::layer::{FadeState, FadeTimes, Layer, LayerId, LayerKind};
use crate::scheduler::Scheduler;
use crate::state::ScoreSnapshot;
use crate::tension::{TensionController, TensionParams};

/// Which music program is running. Exactly one at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Idle,
    Background,
    Carrier,
    Victory,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Idle => write!(f, "idle"),
            SessionMode::Background => write!(f, "background"),
            SessionMode::Carrier => write!(f, "carrier"),
            SessionMode::Victory => write!(f, "victory"),
        }
    }
}

/// Engine tuning.
///
/// - `tension`: tempo mapping, smoothing step and threshold debounce
/// - `fades`: layer fade-in/fade-out lengths
/// - `glide_tau_sec`: time constant for note-to-note pitch glides
/// - `beat_poll_sec`: beat clock polling period
/// - `volume`: initial master volume 0..1
#[derive(Clone, Debug)]
pub struct ScoreParams {
    pub tension: TensionParams,
    pub fades: FadeTimes,
    pub glide_tau_sec: f64,
    pub beat_poll_sec: f64,
    pub volume: f32,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            tension: TensionParams::default(),
            fades: FadeTimes::default(),
            glide_tau_sec: NOTE_GLIDE_TAU_SEC,
            beat_poll_sec: BEAT_POLL_INTERVAL_SEC,
            volume: DEFAULT_MUSIC_VOLUME,
        }
    }
}

impl ScoreParams {
    /// Clamp every knob into a usable range. Timer periods get a positive
    /// floor so re-armed timers always land in the future.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let non_negative = |v: f64, fallback: f64| {
            if v.is_finite() {
                v.max(0.0)
            } else {
                fallback
            }
        };
        let period = |v: f64, fallback: f64| {
            if v.is_finite() {
                v.max(MIN_TIMER_PERIOD_SEC)
            } else {
                fallback
            }
        };
        Self {
            tension: self.tension.sanitized(),
            fades: FadeTimes {
                fade_in_sec: non_negative(self.fades.fade_in_sec, d.fades.fade_in_sec),
                fade_out_sec: non_negative(self.fades.fade_out_sec, d.fades.fade_out_sec),
            },
            glide_tau_sec: period(self.glide_tau_sec, d.glide_tau_sec),
            beat_poll_sec: period(self.beat_poll_sec, d.beat_poll_sec),
            volume: if self.volume.is_nan() {
                d.volume
            } else {
                self.volume.clamp(0.0, 1.0)
            },
        }
    }
}

/// Timers owned by the engine's scheduler. Layer tasks carry the instance id
/// and are re-validated against the registry when they fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Task {
    BeatPoll,
    AdvanceLayer(LayerId),
    FadeInDone(LayerId),
    FadeOutDone(LayerId),
    AdvanceArrangement(u64),
}

impl Task {
    fn layer(&self) -> Option<LayerId> {
        match self {
            Task::AdvanceLayer(id) | Task::FadeInDone(id) | Task::FadeOutDone(id) => Some(*id),
            _ => None,
        }
    }
}

/// Tension-adaptive music engine and the session control surface.
///
/// All state lives here and every timer is an entry in one scheduler, so the
/// engine is driven entirely by its caller:
/// - `update_tension(level)` once per simulated frame
/// - `queue_kill_accent(category, intensity)` whenever an enemy dies
/// - `run_due()` from a ~60 Hz timer to fire beats, notes and fades
///
/// Built without a backend (see [`MusicEngine::silent`]) every method is a
/// no-op, so a missing audio device never reaches the game.
pub struct MusicEngine<B: ToneBackend> {
    backend: Option<B>,
    params: ScoreParams,
    mode: SessionMode,
    session: u64,
    enabled: bool,
    volume: f32,
    level: u32,
    semitones: i32,
    tension: TensionController,
    beat: Option<BeatClock>,
    layers: FnvHashMap<LayerKind, Layer>,
    arrangement: Option<Arrangement>,
    accents: AccentDispatcher,
    scheduler: Scheduler<Task>,
    next_layer_id: u64,
    accents_played: u64,
    last_accent: Option<RenderedAccent>,
}

impl<B: ToneBackend> MusicEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_params(Some(backend), ScoreParams::default())
    }

    /// Engine with no audio capability: silent, every call a no-op.
    pub fn silent() -> Self {
        Self::with_params(None, ScoreParams::default())
    }

    /// Build from a backend constructor result, degrading to silence on error.
    pub fn from_backend(backend: BackendResult<B>) -> Self {
        match backend {
            Ok(b) => Self::new(b),
            Err(e) => {
                log::warn!("music disabled, audio backend unavailable: {}", e);
                Self::silent()
            }
        }
    }

    pub fn with_params(backend: Option<B>, params: ScoreParams) -> Self {
        let params = params.sanitized();
        let volume = params.volume;
        let mut engine = Self {
            backend,
            tension: TensionController::new(params.tension.clone()),
            params,
            mode: SessionMode::Idle,
            session: 0,
            enabled: true,
            volume,
            level: 1,
            semitones: 0,
            beat: None,
            layers: FnvHashMap::default(),
            arrangement: None,
            accents: AccentDispatcher::new(),
            scheduler: Scheduler::new(),
            next_layer_id: 0,
            accents_played: 0,
            last_accent: None,
        };
        engine.apply_master_gain();
        engine
    }

    // ---------------- Session control ----------------

    /// Start the adaptive score for a level (levels below 1 count as 1).
    pub fn start_background_music(&mut self, level: u32) {
        if !self.can_start() {
            return;
        }
        self.teardown();
        let level = level.max(1);
        self.level = level;
        self.semitones = LEVEL_KEY_OFFSETS[(level as usize - 1) % LEVEL_KEY_OFFSETS.len()];
        self.mode = SessionMode::Background;
        self.start_beat_clock();
        self.add_layer(LayerKind::Base);
        log::info!(
            "[music] background level={} key_offset={} tempo={:.1}",
            level,
            self.semitones,
            self.tension.tempo_bpm()
        );
    }

    pub fn start_carrier_music(&mut self) {
        self.start_arrangement(ArrangementKind::Carrier);
    }

    pub fn start_victory_music(&mut self) {
        self.start_arrangement(ArrangementKind::Victory);
    }

    /// Tear everything down and return to idle. Safe from any state.
    pub fn stop_music(&mut self) {
        if self.mode != SessionMode::Idle {
            log::info!("[music] stop ({})", self.mode);
        }
        self.teardown();
    }

    /// Disabling stops the session; starts are ignored until re-enabled.
    pub fn set_music_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if !enabled {
            self.stop_music();
        }
        self.apply_master_gain();
    }

    pub fn set_music_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.apply_master_gain();
    }

    // ---------------- Gameplay inputs ----------------

    /// Feed the current danger level (0..1). Called once per simulated frame.
    ///
    /// Smooths tension one step, refreshes tempo and layer volumes, and, at
    /// most every debounce interval, adds or removes threshold layers.
    pub fn update_tension(&mut self, level: f32) {
        if self.backend.is_none() || self.mode != SessionMode::Background {
            return;
        }
        self.tension.set_target(level);
        self.tension.step();
        let now = self.now();
        if self.tension.should_evaluate(now) {
            self.evaluate_layers(now);
        }
        self.refresh_layer_gains(now);
    }

    /// Queue a percussive accent for the next beat.
    pub fn queue_kill_accent(&mut self, category: &str, intensity: f32) {
        if self.backend.is_none() {
            return;
        }
        self.accents.queue(AccentRequest::new(category, intensity));
    }

    /// Fire every timer whose time has come on the backend clock.
    pub fn run_due(&mut self) {
        if self.backend.is_none() {
            return;
        }
        let now = self.now();
        while let Some((_, task)) = self.scheduler.pop_due(now) {
            self.dispatch(task, now);
        }
    }

    // ---------------- Introspection ----------------

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_silent(&self) -> bool {
        self.backend.is_none()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn tension(&self) -> f32 {
        self.tension.current()
    }

    pub fn target_tension(&self) -> f32 {
        self.tension.target()
    }

    /// Current tempo of whatever is playing.
    pub fn tempo_bpm(&self) -> f64 {
        match &self.arrangement {
            Some(a) => a.kind().bpm(),
            None => self.tension.tempo_bpm(),
        }
    }

    pub fn beat_duration(&self) -> f64 {
        match self.mode {
            SessionMode::Carrier => ArrangementKind::Carrier.beat_duration(),
            SessionMode::Victory => ArrangementKind::Victory.beat_duration(),
            _ => self.tension.beat_duration(),
        }
    }

    pub fn beat_index(&self) -> Option<u8> {
        self.beat.as_ref().map(|b| b.index())
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.get(&kind)
    }

    pub fn layer_state(&self, kind: LayerKind) -> Option<FadeState> {
        self.layers.get(&kind).map(|l| l.fade_state())
    }

    /// Kinds currently present, in `LayerKind` order.
    pub fn active_layers(&self) -> SmallVec<[LayerKind; 4]> {
        LayerKind::ALL
            .iter()
            .copied()
            .filter(|k| self.layers.contains_key(k))
            .collect()
    }

    pub fn arrangement(&self) -> Option<&Arrangement> {
        self.arrangement.as_ref()
    }

    pub fn pending_accents(&self) -> usize {
        self.accents.pending()
    }

    pub fn accents_played(&self) -> u64 {
        self.accents_played
    }

    pub fn last_accent(&self) -> Option<&RenderedAccent> {
        self.last_accent.as_ref()
    }

    /// Tones the engine is currently holding open (layers, arrangement, accents).
    pub fn active_tone_count(&self) -> usize {
        let layers: usize = self.layers.values().map(|l| l.live_tone_count()).sum();
        let arrangement = self
            .arrangement
            .as_ref()
            .map_or(0, |a| a.live_tone_count());
        layers + arrangement + self.accents.ringing_count(self.now())
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            mode: self.mode,
            tension: self.tension.current(),
            tempo_bpm: self.tempo_bpm(),
            beat_index: self.beat_index(),
            layers: self
                .active_layers()
                .into_iter()
                .filter_map(|k| self.layer_state(k).map(|s| (k, s)))
                .collect(),
            pending_accents: self.accents.pending(),
            active_tones: self.active_tone_count(),
        }
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    // ---------------- Internals ----------------

    fn now(&self) -> f64 {
        self.backend.as_ref().map_or(0.0, |b| b.now())
    }

    fn can_start(&self) -> bool {
        if self.backend.is_none() {
            return false;
        }
        if !self.enabled {
            log::debug!("[music] start ignored, music disabled");
            return false;
        }
        true
    }

    fn apply_master_gain(&mut self) {
        let gain = if self.enabled { self.volume } else { 0.0 };
        if let Some(b) = self.backend.as_mut() {
            b.set_master_gain(gain);
        }
    }

    fn start_beat_clock(&mut self) {
        let now = self.now();
        self.beat = Some(BeatClock::new(now));
        self.scheduler
            .schedule(now + self.params.beat_poll_sec, Task::BeatPoll);
    }

    fn start_arrangement(&mut self, kind: ArrangementKind) {
        if !self.can_start() {
            return;
        }
        self.teardown();
        self.mode = match kind {
            ArrangementKind::Carrier => SessionMode::Carrier,
            ArrangementKind::Victory => SessionMode::Victory,
        };
        self.start_beat_clock();
        let fade_in = self.params.fades.fade_in_sec;
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match Arrangement::spawn(backend, kind, fade_in) {
            Ok(a) => {
                let now = backend.now();
                self.arrangement = Some(a);
                self.scheduler.schedule(
                    now + kind.beat_duration(),
                    Task::AdvanceArrangement(self.session),
                );
            }
            Err(e) => log::warn!("[music] {} arrangement unavailable: {}", kind.name(), e),
        }
        log::info!("[music] {} tempo={:.1}", kind.name(), kind.bpm());
    }

    /// Stop every tone and timer and reset shared state.
    fn teardown(&mut self) {
        self.scheduler.clear();
        self.session += 1;
        if let Some(backend) = self.backend.as_mut() {
            let now = backend.now();
            for (_, mut layer) in self.layers.drain() {
                layer.teardown(backend, now);
            }
            if let Some(mut a) = self.arrangement.take() {
                a.teardown(backend, now);
            }
            self.accents.clear(backend);
        }
        self.layers.clear();
        self.arrangement = None;
        self.tension.reset();
        self.beat = None;
        self.mode = SessionMode::Idle;
    }

    fn dispatch(&mut self, task: Task, now: f64) {
        match task {
            Task::BeatPoll => self.on_beat_poll(now),
            Task::AdvanceLayer(id) => self.on_advance_layer(id, now),
            Task::FadeInDone(id) => {
                if let Some(layer) = self.layer_by_id_mut(id) {
                    layer.finish_fade_in();
                    self.refresh_layer_gains(now);
                }
            }
            Task::FadeOutDone(id) => self.on_fade_out_done(id, now),
            Task::AdvanceArrangement(session) => {
                if session != self.session {
                    return;
                }
                let tau = self.params.glide_tau_sec;
                if let (Some(backend), Some(a)) = (self.backend.as_mut(), self.arrangement.as_mut())
                {
                    a.advance_note(backend, now, tau);
                    let next = now + a.kind().beat_duration();
                    self.scheduler
                        .schedule(next, Task::AdvanceArrangement(session));
                }
            }
        }
    }

    fn on_beat_poll(&mut self, now: f64) {
        let duration = self.beat_duration();
        let Some(clock) = self.beat.as_mut() else {
            return;
        };
        if clock.poll(now, duration).is_some() {
            if let Some(backend) = self.backend.as_mut() {
                if let Some(accent) = self.accents.drain_one(backend) {
                    self.accents_played += 1;
                    self.last_accent = Some(accent);
                }
            }
        }
        if self.mode == SessionMode::Background {
            self.refresh_layer_gains(now);
        }
        self.scheduler
            .schedule(now + self.params.beat_poll_sec, Task::BeatPoll);
    }

    fn on_advance_layer(&mut self, id: LayerId, now: f64) {
        let tau = self.params.glide_tau_sec;
        let beat = self.tension.beat_duration();
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let Some(layer) = self.layers.values_mut().find(|l| l.id() == id) else {
            log::trace!("[music] note timer for gone layer {:?}", id);
            return;
        };
        if layer.fade_state() == FadeState::Removed {
            return;
        }
        layer.advance_note(backend, now, tau);
        // Re-armed at the tempo in force now, so tempo changes land on the next note.
        self.scheduler.schedule(now + beat, Task::AdvanceLayer(id));
    }

    fn on_fade_out_done(&mut self, id: LayerId, now: f64) {
        let Some(kind) = self
            .layers
            .iter()
            .find(|(_, l)| l.id() == id)
            .map(|(k, _)| *k)
        else {
            return;
        };
        self.scheduler.cancel_where(|t| t.layer() == Some(id));
        if let (Some(mut layer), Some(backend)) = (self.layers.remove(&kind), self.backend.as_mut())
        {
            layer.teardown(backend, now);
        }
        log::debug!("[music] layer {} removed", kind);
    }

    fn layer_by_id_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.values_mut().find(|l| l.id() == id)
    }

    /// Add/remove decisions for the current tension.
    fn evaluate_layers(&mut self, now: f64) {
        if !self.layers.contains_key(&LayerKind::Base) {
            // A base layer that failed to start gets another chance here.
            self.add_layer(LayerKind::Base);
        }
        let decisions: SmallVec<[(LayerKind, bool); 3]> = self.tension.wanted_layers().collect();
        for (kind, wanted) in decisions {
            match (wanted, self.layer_state(kind)) {
                (true, None) => self.add_layer(kind),
                (true, Some(FadeState::FadingOut)) => {
                    log::trace!("[music] {} waits for its fade-out to finish", kind);
                }
                (false, Some(FadeState::FadingIn | FadeState::Steady)) => {
                    self.remove_layer(kind, now)
                }
                _ => {}
            }
        }
    }

    fn add_layer(&mut self, kind: LayerKind) {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        let semitones = self.semitones;
        let fades = self.params.fades;
        let beat = self.tension.beat_duration();
        let tension = self.tension.current();
        let horizon = self.params.beat_poll_sec;
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match Layer::spawn(backend, id, kind, semitones, fades) {
            Ok(mut layer) => {
                let now = backend.now();
                layer.apply_gain(backend, tension, now, horizon);
                self.layers.insert(kind, layer);
                self.scheduler.schedule(now + beat, Task::AdvanceLayer(id));
                self.scheduler
                    .schedule(now + fades.fade_in_sec, Task::FadeInDone(id));
                log::debug!("[music] layer {} fading in (tension {:.2})", kind, tension);
            }
            Err(e) => log::warn!("[music] layer {} unavailable: {}", kind, e),
        }
    }

    fn remove_layer(&mut self, kind: LayerKind, now: f64) {
        let fade_out = self.params.fades.fade_out_sec;
        let Some(layer) = self.layers.get_mut(&kind) else {
            return;
        };
        if !layer.begin_fade_out(now) {
            return;
        }
        let id = layer.id();
        self.scheduler.cancel_where(|t| *t == Task::FadeInDone(id));
        self.scheduler.schedule(now + fade_out, Task::FadeOutDone(id));
        log::debug!("[music] layer {} fading out", kind);
    }

    fn refresh_layer_gains(&mut self, now: f64) {
        let tension = self.tension.current();
        let horizon = self.params.beat_poll_sec;
        if let Some(backend) = self.backend.as_mut() {
            for layer in self.layers.values_mut() {
                layer.apply_gain(backend, tension, now, horizon);
            }
        }
    }
}

/// Convert a MIDI note number to Hertz (A4=440 Hz).
///
/// Monotonic and exhibits octave symmetry: +12 semitones doubles the frequency.
pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * (2.0_f32).powf((midi - 69.0) / 12.0)
}
