//! ai-analyze: 单次结构化分析的命令行工具
//!
//! Usage:
//!   ai-analyze [--config <file>] [--lang <code>] [--mode <mode>] <text...>
//!   ai-analyze print-config [--config <file>]
//!
//! The analysis result is printed to stdout as JSON; logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).

use ai_analysis_runtime::{Analyzer, AnalyzerConfig};
use anyhow::{bail, Context};
use std::path::PathBuf;

struct Args {
    config: Option<PathBuf>,
    language: String,
    mode: String,
    text: String,
    print_config: bool,
}

fn print_usage() {
    println!(
        r#"ai-analyze - structured analysis of a single problem text

USAGE:
    ai-analyze [OPTIONS] <TEXT...>
    ai-analyze print-config [--config <file>]

OPTIONS:
    --config <file>     YAML configuration file
    --lang <code>       Answer language (default: en)
    --mode <mode>       Analysis mode (default: general)
    -h, --help          Show this help message
    -V, --version       Show version information

ENVIRONMENT:
    AI_ANALYZE_*        Configuration overrides (see crate docs)
    <PROVIDER>_API_KEY  Provider API key, e.g. OPENAI_API_KEY
    RUST_LOG            Log filter (default: info)"#
    );
}

fn parse_args(raw: &[String]) -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        config: None,
        language: "en".to_string(),
        mode: "general".to_string(),
        text: String::new(),
        print_config: false,
    };
    let mut words = Vec::new();
    let mut iter = raw.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" | "help" => {
                print_usage();
                return Ok(None);
            }
            "-V" | "--version" => {
                println!("ai-analyze {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "print-config" if words.is_empty() => args.print_config = true,
            "--config" => {
                let path = iter.next().context("--config needs a file path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--lang" => args.language = iter.next().context("--lang needs a language code")?.clone(),
            "--mode" => args.mode = iter.next().context("--mode needs a value")?.clone(),
            other if other.starts_with("--") => bail!("unknown option: {other}"),
            word => words.push(word.to_string()),
        }
    }
    args.text = words.join(" ");
    if !args.print_config && args.text.trim().is_empty() {
        print_usage();
        bail!("no text given");
    }
    Ok(Some(args))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&raw)? else {
        return Ok(());
    };

    let config = AnalyzerConfig::load(args.config.as_deref()).context("loading configuration")?;
    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let analyzer = Analyzer::builder()
        .with_config(config)
        .build()
        .context("building analyzer")?;

    let result = analyzer
        .analyze(&args.text, &args.language, &args.mode)
        .await
        .context("analysis rejected")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    analyzer.shutdown();
    Ok(())
}
