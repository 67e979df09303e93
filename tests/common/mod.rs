//! Shared fixtures for integration tests

#![allow(dead_code)]

use ai_analysis_runtime::provider::ScriptedProvider;
use ai_analysis_runtime::{Analyzer, AnalyzerConfig, CompletionProvider};
use std::sync::Arc;

pub const BUBBLE_SORT_EN: &str = r#"{"summary": "Bubble sort repeatedly swaps adjacent elements", "steps": ["Compare neighbours", "Swap when out of order", "Repeat until no swaps"]}"#;

pub const PROSE_WRAPPED: &str = "Sure! Here is the structured analysis:\n\n{\"summary\": \"Binary search halves the search range\", \"steps\": [\"Compare with the middle\", \"Discard one half\"], \"pseudocode\": \"while lo <= hi: ...\"}\n\nI hope this helps.";

/// Defaults with deterministic, short backoff and no background sweeper.
pub fn fast_config() -> AnalyzerConfig {
    let mut config = AnalyzerConfig::default();
    config.retry.jitter_ms = 0;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.cache.sweep_interval_secs = 0;
    config
}

pub fn analyzer(config: AnalyzerConfig, provider: &Arc<ScriptedProvider>) -> Analyzer {
    Analyzer::new(config, Arc::clone(provider) as Arc<dyn CompletionProvider>)
        .expect("analyzer should build")
}
