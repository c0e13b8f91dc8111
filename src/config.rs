//! Environment-driven configuration, following `settings.py`'s typed-coercion
//! pattern: read a string env var, fall back to a default on absence or
//! parse failure, then clamp out-of-range values to a sane floor.
//!
//! This crate carries no GGUF model paths or llama.cpp runtime knobs (n_ctx
//! per role, GPU layers, chat-format names, seed): it has no concrete
//! inference backend to configure. A caller wires up its own
//! [`crate::models::TranslateModel`]/[`crate::models::AgentModel`] and passes
//! them to [`crate::pipeline::translate_file`] directly.

use std::env;

fn int_env(name: &str, default: i64) -> i64 {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => !matches!(
            raw.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        Err(_) => default,
    }
}

fn float_env(name: &str, default: f64) -> f64 {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn str_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Run configuration, built from `DOC_TRANSLATOR_*` environment variables.
/// Immutable once constructed, mirroring `settings.py`'s frozen dataclass.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source_lang_code: Option<String>,
    pub target_lang_code: Option<String>,
    pub target_style: Option<String>,
    pub enable_style_guide: bool,
    pub enable_decision: bool,
    pub decision_min_chars: usize,
    pub enable_context: bool,
    pub context_max_excerpts: usize,
    pub glossary_max_terms: usize,
    pub glossary_max_items_per_tu: usize,
    pub max_input_tokens: i64,
    pub max_new_tokens: usize,
    pub checkpoint_every: i64,
    pub hard_failure_repair_rounds: usize,
    pub max_tus: i64,
    pub heartbeat_seconds: f64,
    pub progress: bool,
    pub log_tu_samples: bool,
    pub log_tu_max_chars: usize,
    pub log_tu_every: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        let decision_min_chars = int_env("DOC_TRANSLATOR_DECISION_MIN_CHARS", 220).max(0) as usize;
        let context_max_excerpts = int_env("DOC_TRANSLATOR_CONTEXT_MAX_EXCERPTS", 40).max(0) as usize;
        let glossary_max_terms = int_env("DOC_TRANSLATOR_GLOSSARY_MAX_TERMS", 40).max(0) as usize;
        let glossary_max_items_per_tu =
            int_env("DOC_TRANSLATOR_GLOSSARY_MAX_ITEMS_PER_TU", 16).max(0) as usize;
        let max_new_tokens = int_env("DOC_TRANSLATOR_MAX_NEW_TOKENS", 1024).max(1) as usize;
        let hard_failure_repair_rounds =
            int_env("DOC_TRANSLATOR_HARD_FAILURE_REPAIR_ROUNDS", 2).max(0) as usize;
        let heartbeat_seconds = float_env("DOC_TRANSLATOR_HEARTBEAT_SECONDS", 8.0).max(0.0);
        let log_tu_max_chars = int_env("DOC_TRANSLATOR_LOG_TU_MAX_CHARS", 120).max(0) as usize;
        let log_tu_every = int_env("DOC_TRANSLATOR_LOG_TU_EVERY", 20).max(1) as usize;

        Settings {
            source_lang_code: str_env("DOC_TRANSLATOR_SOURCE_LANG"),
            target_lang_code: str_env("DOC_TRANSLATOR_TARGET_LANG"),
            target_style: str_env("DOC_TRANSLATOR_TARGET_STYLE"),
            enable_style_guide: bool_env("DOC_TRANSLATOR_ENABLE_STYLE_GUIDE", true),
            enable_decision: bool_env("DOC_TRANSLATOR_ENABLE_DECISION", true),
            decision_min_chars,
            enable_context: bool_env("DOC_TRANSLATOR_ENABLE_CONTEXT", true),
            context_max_excerpts,
            glossary_max_terms,
            glossary_max_items_per_tu,
            max_input_tokens: int_env("DOC_TRANSLATOR_MAX_INPUT_TOKENS", 1800),
            max_new_tokens,
            checkpoint_every: int_env("DOC_TRANSLATOR_CHECKPOINT_EVERY", 25),
            hard_failure_repair_rounds,
            max_tus: int_env("DOC_TRANSLATOR_MAX_TUS", -1),
            heartbeat_seconds,
            progress: bool_env("DOC_TRANSLATOR_PROGRESS", true),
            log_tu_samples: bool_env("DOC_TRANSLATOR_LOG_TU_SAMPLES", true),
            log_tu_max_chars,
            log_tu_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn int_env_falls_back_on_bad_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DOC_TRANSLATOR_TEST_INT", "not-a-number");
        assert_eq!(int_env("DOC_TRANSLATOR_TEST_INT", 42), 42);
        env::remove_var("DOC_TRANSLATOR_TEST_INT");
    }

    #[test]
    fn bool_env_recognizes_off_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("DOC_TRANSLATOR_TEST_BOOL", "No");
        assert!(!bool_env("DOC_TRANSLATOR_TEST_BOOL", true));
        env::set_var("DOC_TRANSLATOR_TEST_BOOL", "yes-ish");
        assert!(bool_env("DOC_TRANSLATOR_TEST_BOOL", false));
        env::remove_var("DOC_TRANSLATOR_TEST_BOOL");
    }

    #[test]
    fn settings_from_env_has_sane_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let s = Settings::from_env();
        assert!(s.decision_min_chars > 0);
        assert!(s.max_new_tokens > 0);
        assert!(s.log_tu_every >= 1);
    }
}
