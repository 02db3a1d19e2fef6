//! Transcript translation: chunk planning, the `[id]\ttext` line codec and
//! the retrying translator that persists run progress.

pub mod chunker;
pub mod codec;
pub mod translator;

pub use chunker::{estimate_tokens, plan_chunks, ChunkPlan};
pub use translator::{TranslationRequest, Translator};
