//! Pipeline RAG multimodal que convierte un corpus de vídeos instructivos
//! más un vídeo del usuario en feedback de coaching en lenguaje natural.

pub mod compose;
pub mod config;
pub mod corpus;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod prompt;

pub use compose::{FeedbackResult, FALLBACK_FEEDBACK};
pub use config::{AppConfig, GenProvider};
pub use corpus::{scan_instructional_dir, MediaKind, VideoAsset, VideoCorpus};
pub use error::{CoachError, Result};
pub use pipeline::PipelineOrchestrator;
pub use prompt::{CoachingTone, PromptSpec};
