pub mod engine;
pub mod prepare;

pub use engine::{AudiverisEngine, OmrEngine};
pub use prepare::{PageRenderer, PdftoppmRenderer};
