//! Core type definitions shared across the runtime.

pub mod analysis;
pub mod message;

pub use analysis::{AnalysisMeta, AnalysisResult, AnalysisStatus, DegradeReason};
pub use message::{Message, MessageRole};
