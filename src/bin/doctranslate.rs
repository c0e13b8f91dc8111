//! Command-line entry point (§6 / §9).
//!
//! A thin wrapper around [`doctranslate::pipeline::translate_file`]: argument
//! parsing, settings/`.env` loading, logging setup, and `AgentContext`
//! construction from flags live here; all translation logic lives in the
//! library.
//!
//! This binary ships with [`doctranslate::models::UnconfiguredModel`] wired
//! in by default. That is deliberate: this crate does not load an inference
//! engine, so running `doctranslate` as built refuses every translate/agent
//! call with a [`doctranslate::DocError::ModelLoad`] naming the boundary.
//! Embedders fork this binary (or write their own thin wrapper) and swap in
//! a real `TranslateModel`/`AgentModel` built from their own engine.

use clap::Parser;
use doctranslate::config::Settings;
use doctranslate::models::{AgentContext, UnconfiguredModel};
use doctranslate::progress::LogProgress;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input .docx path
    input: PathBuf,

    /// Output .docx path
    output: PathBuf,

    /// Source language code (overrides auto-detection and $DOC_TRANSLATOR_SOURCE_LANG)
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language code (overrides $DOC_TRANSLATOR_TARGET_LANG)
    #[arg(long)]
    target_lang: Option<String>,

    /// Target register/style guidance, e.g. "formal"
    #[arg(long)]
    target_style: Option<String>,

    /// Document domain hint, e.g. "legal contract"
    #[arg(long)]
    domain: Option<String>,

    /// Document type hint, e.g. "lease agreement"
    #[arg(long)]
    doc_type: Option<String>,

    /// One-paragraph document summary, fed into translation/agent prompts
    #[arg(long)]
    summary: Option<String>,

    /// Free-text style guide, fed into translation/agent prompts
    #[arg(long)]
    style_guide: Option<String>,

    /// Glossary file: one `source_term\ttarget_term` pair per line
    #[arg(long)]
    glossary: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_glossary(path: &PathBuf) -> Result<HashMap<String, String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("failed to read glossary {}: {err}", path.display()))?;
    let mut glossary = HashMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (src, tgt) = line
            .split_once('\t')
            .or_else(|| line.split_once('='))
            .ok_or_else(|| format!("{}:{}: expected `term<TAB>translation`", path.display(), lineno + 1))?;
        glossary.insert(src.trim().to_string(), tgt.trim().to_string());
    }
    Ok(glossary)
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn run(args: Args) -> Result<(), String> {
    let glossary = match &args.glossary {
        Some(path) => load_glossary(path)?,
        None => HashMap::new(),
    };

    let mut settings = Settings::from_env();
    if args.source_lang.is_some() {
        settings.source_lang_code = args.source_lang.clone();
    }
    if args.target_lang.is_some() {
        settings.target_lang_code = args.target_lang.clone();
    }

    let ctx = AgentContext {
        domain: args.domain.clone(),
        doc_type: args.doc_type.clone(),
        summary: args.summary.clone(),
        target_style: args.target_style.clone().or_else(|| settings.target_style.clone()),
        style_guide: args.style_guide.clone(),
        glossary,
    };

    let progress = LogProgress::new();
    let model = UnconfiguredModel;

    doctranslate::translate_file(
        &progress,
        &settings,
        &model,
        Some(&model),
        &ctx,
        &args.input,
        &args.output,
    )
    .map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("doctranslate: {err}");
            ExitCode::FAILURE
        }
    }
}
