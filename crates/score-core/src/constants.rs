// Shared tuning constants for the adaptive score. Times are in seconds.

// Tempo mapping: bpm = TEMPO_BASE_BPM + tension * TEMPO_RANGE_BPM
pub const TEMPO_BASE_BPM: f64 = 60.0;
pub const TEMPO_RANGE_BPM: f64 = 60.0;

// Fraction of the remaining tension gap closed on every update
pub const TENSION_SMOOTHING: f32 = 0.05;
// Below this gap the smoothed tension snaps onto its target
pub const TENSION_EPSILON: f32 = 1e-5;

// Layer add/remove decisions are taken at most this often
pub const THRESHOLD_DEBOUNCE_SEC: f64 = 0.2;

// Tension thresholds above which each additive layer plays
pub const BATTLE_THRESHOLD: f32 = 0.3;
pub const INTENSE_THRESHOLD: f32 = 0.6;
pub const EXTREME_THRESHOLD: f32 = 0.8;

// Layer fades
pub const LAYER_FADE_IN_SEC: f64 = 0.5;
pub const LAYER_FADE_OUT_SEC: f64 = 0.5;

// Note glide time constant (setTargetAtTime-style approach)
pub const NOTE_GLIDE_TAU_SEC: f64 = 0.05;

// Per-layer gain caps at full tension
pub const BASE_GAIN_MIN: f32 = 0.10;
pub const BASE_GAIN_MAX: f32 = 0.16;
pub const BATTLE_GAIN_MAX: f32 = 0.12;
pub const INTENSE_GAIN_MAX: f32 = 0.10;
pub const EXTREME_GAIN_MAX: f32 = 0.08;

// Beat clock polling cadence (~60 Hz)
pub const BEAT_POLL_INTERVAL_SEC: f64 = 1.0 / 60.0;
// Floor for any re-armed timer period, so a timer never fires twice at one instant
pub const MIN_TIMER_PERIOD_SEC: f64 = 1.0e-3;
pub const BEATS_PER_BAR: u8 = 4;

// Kill accent queue bounds: past the limit, keep only the newest entries
pub const ACCENT_QUEUE_LIMIT: usize = 10;
pub const ACCENT_QUEUE_KEEP: usize = 5;

// Kill accent tone shape
pub const ACCENT_DURATION_SEC: f64 = 0.1;
pub const ACCENT_ATTACK_SEC: f64 = 0.005;
pub const ACCENT_PEAK_GAIN: f32 = 0.35;
pub const ACCENT_FLOOR_GAIN: f32 = 0.001;

// Kill accent pitch per enemy class
pub const ACCENT_HEAVY_HZ: f32 = 100.0;
pub const ACCENT_SWARM_HZ: f32 = 150.0;
pub const ACCENT_DEFAULT_HZ: f32 = 250.0;

// Fixed-arrangement tempos
pub const CARRIER_BPM: f64 = 90.0;
pub const VICTORY_BPM: f64 = 132.0;
pub const ARRANGEMENT_GAIN: f32 = 0.09;

// Semitone transposition per background level, cycled
pub const LEVEL_KEY_OFFSETS: [i32; 6] = [0, 3, -2, 5, 1, -4];

// Default master volume
pub const DEFAULT_MUSIC_VOLUME: f32 = 0.5;
