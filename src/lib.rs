//! # ai-analysis-runtime
//!
//! 面向结构化 LLM 分析的协调运行时：缓存、单飞去重、重试退避与熔断保护。
//!
//! Coordination runtime between application callers and a single LLM
//! completion service.
//!
//! ## Overview
//!
//! The runtime turns `analyze(text, language, mode)` into at most one upstream
//! call per distinct request, keeps transient upstream failures away from
//! callers, protects the provider from overload and converts free-text
//! completions into a validated [`AnalysisResult`].
//!
//! ## Core Philosophy
//!
//! - **One call per key**: identical concurrent requests share a single in-flight call
//! - **Degrade, don't throw**: upstream trouble yields a tagged degraded result
//! - **Narrow boundaries**: the provider and the prompt wording sit behind traits
//! - **Immutable results**: cached values are shared as `Arc` and never mutated
//!
//! ## Quick Start
//!
//! ```rust
//! use ai_analysis_runtime::provider::ScriptedProvider;
//! use ai_analysis_runtime::{Analyzer, AnalyzerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ai_analysis_runtime::Result<()> {
//!     let provider = Arc::new(
//!         ScriptedProvider::new("demo-model")
//!             .then_reply(r#"{"summary": "Binary search halves the range", "steps": ["compare", "halve"]}"#),
//!     );
//!     let analyzer = Analyzer::new(AnalyzerConfig::default(), provider)?;
//!
//!     let result = analyzer.analyze("Explain binary search", "en", "general").await?;
//!     assert!(result.is_ok());
//!     assert_eq!(result.steps.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`analyzer`] | The public `analyze` operation and its builder |
//! | [`cache`] | Bounded LRU + TTL result cache |
//! | [`coordinator`] | Single-flight deduplication of concurrent requests |
//! | [`resilience`] | Retry with backoff, circuit breaker, rate limiting |
//! | [`parser`] | JSON extraction, field validation, language check |
//! | [`provider`] | Upstream completion boundary and HTTP implementation |
//! | [`prompt`] | Prompt construction boundary |
//! | [`config`] | Defaults, YAML and environment configuration |
//! | [`signals`] | Point-in-time observability snapshot |
//! | [`types`] | Result and message types |

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod resilience;
pub mod signals;
pub mod types;

// Re-export main types for convenience
pub use analyzer::{Analyzer, AnalyzerBuilder};
pub use config::{AnalyzerConfig, LanguagePolicy};
pub use coordinator::RequestCoordinator;
pub use parser::{ParseError, ResponseParser};
pub use provider::{CompletionProvider, ProviderError};
pub use resilience::CircuitState;
pub use signals::SignalsSnapshot;
pub use types::{AnalysisMeta, AnalysisResult, AnalysisStatus, DegradeReason, Message, MessageRole};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
