//! Read-only view of the engine shared with frontends.
//!
//! These types avoid platform APIs. The web frontend hands them to the game's
//! debug overlay; the native demo logs them.

use smallvec::SmallVec;
use std::fmt;

use crate::layer::{FadeState, LayerKind};
use crate::music::SessionMode;

/// Point-in-time summary of the running score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreSnapshot {
    pub mode: SessionMode,
    pub tension: f32,
    pub tempo_bpm: f64,
    /// Position in the bar while a session runs.
    pub beat_index: Option<u8>,
    pub layers: SmallVec<[(LayerKind, FadeState); 4]>,
    pub pending_accents: usize,
    pub active_tones: usize,
}

impl ScoreSnapshot {
    pub fn has_layer(&self, kind: LayerKind) -> bool {
        self.layers.iter().any(|(k, _)| *k == kind)
    }
}

impl fmt::Display for ScoreSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tension={:.2} bpm={:.1} beat={} layers=[",
            self.mode,
            self.tension,
            self.tempo_bpm,
            self.beat_index.map_or("-".to_string(), |b| b.to_string()),
        )?;
        for (i, (kind, state)) in self.layers.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let mark = match state {
                FadeState::FadingIn => "+",
                FadeState::Steady => "",
                FadeState::FadingOut => "-",
                FadeState::Removed => "x",
            };
            write!(f, "{}{}", mark, kind)?;
        }
        write!(
            f,
            "] accents={} tones={}",
            self.pending_accents, self.active_tones
        )
    }
}
