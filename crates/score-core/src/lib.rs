pub mod accent;
pub mod arrangement;
pub mod backend;
pub mod beat;
pub mod constants;
pub mod layer;
pub mod music;
pub mod scheduler;
pub mod state;
pub mod tension;
pub mod tone;

pub use accent::{AccentClass, AccentRequest, RenderedAccent};
pub use arrangement::ArrangementKind;
pub use backend::*;
pub use layer::{FadeState, LayerKind};
pub use music::*;
pub use state::*;
