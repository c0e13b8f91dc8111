//! Script detection, language-pair auto-detection, and the pre-filter that
//! decides whether a translation unit needs to go to a model at all.

use crate::ir::TranslationUnit;
use crate::sentinels::any_sentinel;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Renders sentinel brackets as plain angle brackets and collapses
/// whitespace so log lines stay on one line and don't choke a terminal
/// on raw control tokens. Truncates with an ellipsis past `max_chars`.
pub fn preview_for_log(text: &str, max_chars: usize) -> String {
    let collapsed = whitespace_re().replace_all(text, " ");
    let collapsed = collapsed.trim();
    let truncated: String = collapsed.chars().take(max_chars).collect();
    if collapsed.chars().count() > max_chars {
        format!("{truncated}…")
    } else {
        truncated
    }
}

/// English name for a language code, for use inside prompts to a model.
pub fn lang_prompt_name(code: &str) -> &'static str {
    match code {
        "zh" => "Simplified Chinese",
        _ => "English",
    }
}

/// Native-script name for a language code, for use inside prompts to a model.
pub fn lang_prompt_native(code: &str) -> &'static str {
    match code {
        "zh" => "简体中文",
        _ => "English",
    }
}

/// Finds the first `{` in `text` and attempts to parse a JSON object
/// starting there, tolerating trailing prose after the closing brace
/// (agent models routinely wrap their JSON answer in commentary).
pub fn try_extract_json_obj(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
    let value = stream.next()?.ok()?;
    if value.is_object() {
        Some(value)
    } else {
        None
    }
}

macro_rules! script_regex {
    ($name:ident, $pat:expr) => {
        pub(crate) fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pat).unwrap())
        }
    };
}

script_regex!(cjk_re, r"[\u{4e00}-\u{9fff}]");
script_regex!(latin_re, r"[A-Za-z]");
script_regex!(latin_ext_re, r"[\u{00C0}-\u{024F}]");
script_regex!(devanagari_re, r"[\u{0900}-\u{097F}]");
script_regex!(bengali_re, r"[\u{0980}-\u{09FF}]");
script_regex!(arabic_re, r"[\u{0600}-\u{06FF}]");
script_regex!(cyrillic_re, r"[\u{0400}-\u{04FF}]");
script_regex!(greek_re, r"[\u{0370}-\u{03FF}]");
script_regex!(hebrew_re, r"[\u{0590}-\u{05FF}]");
script_regex!(thai_re, r"[\u{0E00}-\u{0E7F}]");
script_regex!(hangul_re, r"[\u{AC00}-\u{D7AF}]");
script_regex!(hiragana_re, r"[\u{3040}-\u{309F}]");
script_regex!(katakana_re, r"[\u{30A0}-\u{30FF}]");

fn other_script_res() -> &'static [&'static Regex] {
    static RES: OnceLock<Vec<&'static Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            devanagari_re(),
            bengali_re(),
            arabic_re(),
            cyrillic_re(),
            greek_re(),
            hebrew_re(),
            thai_re(),
            hangul_re(),
            hiragana_re(),
            katakana_re(),
        ]
    })
    .as_slice()
}

fn number_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn en_common_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "a", "an", "and", "are", "as", "at", "be", "between", "by", "dated", "for", "from",
            "has", "have", "in", "into", "is", "it", "its", "may", "not", "of", "on", "or",
            "shall", "subject", "such", "that", "the", "their", "this", "to", "under", "will",
            "with",
        ]
        .into_iter()
        .collect()
    })
}

fn ascii_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z]{2,}").unwrap())
}

fn entity_stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "is", "are", "was", "were", "to", "the", "a", "an", "of", "for", "in", "on", "at",
            "by", "as", "from", "and", "or", "not", "will", "shall", "may", "must", "subject",
        ]
        .into_iter()
        .collect()
    })
}

fn entity_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(inc\.?|incorporated|ltd\.?|limited|llc|l\.l\.c\.|plc|gmbh|s\.a\.|s\.a\.s\.|s\.r\.l\.|corp\.?|corporation|company|co\.|n\.a\.|n\.v\.|ag|bv|b\.v\.)\b",
        )
        .unwrap()
    })
}

fn entity_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z'.]{1,}").unwrap())
}

/// Heuristic for "this Latin phrase is a company name", used to avoid
/// flagging legitimate untranslated entity names as quality issues.
pub fn looks_like_entity_name(text: &str) -> bool {
    let t = whitespace_re().replace_all(text, " ").trim().to_string();
    if t.is_empty() || t.len() > 120 {
        return false;
    }
    if !entity_suffix_re().is_match(&t) {
        return false;
    }
    let words: Vec<&str> = entity_word_re().find_iter(&t).map(|m| m.as_str()).collect();
    if words.is_empty() {
        return false;
    }
    let stop_hits = words
        .iter()
        .filter(|w| {
            let lw = w.trim_end_matches('.').to_lowercase();
            entity_stopwords().contains(lw.as_str()) && lw != "and"
        })
        .count();
    if stop_hits > 0 {
        return false;
    }

    let mut title_like = 0;
    let mut upper_like = 0;
    for w in &words {
        let w2 = w.trim_end_matches('.');
        if w2.is_empty() {
            continue;
        }
        if w2.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) && w2.len() >= 2 {
            upper_like += 1;
            title_like += 1;
            continue;
        }
        let mut chars = w2.chars();
        if let Some(first) = chars.next() {
            if first.is_uppercase() && (w2.len() == 1 || chars.as_str().chars().all(|c| c.is_lowercase() || !c.is_alphabetic())) {
                title_like += 1;
            }
        }
    }

    let n = words.len().max(1) as f64;
    if upper_like >= 2 && (upper_like as f64) / n >= 0.6 {
        return true;
    }
    if words.len() <= 4 && title_like >= 2 && (title_like as f64) / n >= 0.6 {
        return true;
    }
    if words.len() >= 5 && title_like >= 3 && (title_like as f64) / n >= 0.6 {
        return true;
    }
    false
}

/// Strips sentinels, then collapses whitespace. The shared surface textutil
/// and quality heuristics reason over.
pub fn text_for_lang(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let stripped = any_sentinel().replace_all(text, " ");
    whitespace_re().replace_all(&stripped, " ").trim().to_string()
}

pub fn other_script_count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    other_script_res()
        .iter()
        .map(|re| re.find_iter(text).count())
        .sum()
}

/// Coarse English heuristic: enough common function words relative to the
/// number of alphabetic tokens.
pub fn looks_like_english(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    let words: Vec<&str> = ascii_word_re().find_iter(&lower).map(|m| m.as_str()).collect();
    if words.is_empty() {
        return false;
    }
    let common_hits = words
        .iter()
        .filter(|w| en_common_words().contains(*w))
        .count();
    if words.len() >= 4 {
        return common_hits >= 1;
    }
    true
}

/// Counts number tokens (locale-agnostic: digit groups with optional
/// thousands/decimal separators and a single numeric range). Sentinels are
/// stripped first so NT placeholders never register as numbers.
pub fn number_tokens_in_text(text: &str) -> HashMap<String, usize> {
    let plain = any_sentinel().replace_all(text, " ").into_owned();
    let mut counts = HashMap::new();
    // `regex` has no lookaround, so reject matches abutting a digit by hand
    // (equivalent to the original's `(?<!\d)...(?!\d)`).
    for m in number_token_re().find_iter(&plain) {
        let before_is_digit = plain[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit());
        let after_is_digit = plain[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        if before_is_digit || after_is_digit {
            continue;
        }
        *counts.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

fn scope_type_tag(scope_key: &str) -> &'static str {
    for tag in ["w:p", "a:p", "w:lvlText"] {
        if scope_key.contains(&format!("#{tag}@")) {
            return tag;
        }
    }
    "unknown"
}

/// Votes across a sample of translation units to pick the (source, target)
/// language pair. Returns `None` when the sample looks like neither English
/// nor Chinese (e.g. predominantly some third script).
pub fn detect_language_pair_from_tus(tus: &[TranslationUnit]) -> Option<(&'static str, &'static str, String)> {
    let preferred: Vec<&TranslationUnit> = tus
        .iter()
        .filter(|tu| {
            tu.part_name.ends_with("word/document.xml")
                && scope_type_tag(&tu.scope_key) == "w:p"
                && !tu.source_surface.is_empty()
        })
        .collect();
    let base: Vec<&TranslationUnit> = if preferred.is_empty() {
        tus.iter().collect()
    } else {
        preferred
    };
    let samples = &base[..base.len().min(200)];

    let (mut total_cjk, mut total_latin, mut total_latin_ext, mut total_other) = (0i64, 0i64, 0i64, 0i64);
    let (mut en_votes, mut zh_votes, mut unknown_votes) = (0i64, 0i64, 0i64);

    for tu in samples {
        let t = text_for_lang(&tu.source_surface);
        if t.is_empty() {
            continue;
        }
        let cjk = cjk_re().find_iter(&t).count() as i64;
        let latin = latin_re().find_iter(&t).count() as i64;
        let latin_ext = latin_ext_re().find_iter(&t).count() as i64;
        let other = other_script_count(&t) as i64;

        total_cjk += cjk;
        total_latin += latin;
        total_latin_ext += latin_ext;
        total_other += other;

        if other > 0 {
            unknown_votes += 1;
            continue;
        }
        if cjk >= 4 && cjk >= (latin + latin_ext) * 2 {
            zh_votes += 1;
            continue;
        }
        if latin >= 4 && latin >= cjk * 2 && latin_ext <= (latin * 3 / 100).max(1) {
            if looks_like_english(&t) {
                en_votes += 1;
            } else {
                unknown_votes += 1;
            }
            continue;
        }
        if cjk > 0 && latin == 0 && latin_ext == 0 {
            zh_votes += 1;
            continue;
        }
        if latin > 0 && cjk == 0 && latin_ext == 0 {
            en_votes += 1;
            continue;
        }
        unknown_votes += 1;
    }

    let detail = format!(
        "auto language detect (en<->zh only): en_votes={en_votes} zh_votes={zh_votes} \
         unknown={unknown_votes} chars(cjk={total_cjk} latin={total_latin} \
         latin_ext={total_latin_ext} other={total_other})"
    );

    let has_en_signal = en_votes > 0 || total_latin > 0;
    let has_zh_signal = zh_votes > 0 || total_cjk > 0;
    if !has_en_signal && !has_zh_signal && total_other > 0 {
        return None;
    }

    if zh_votes >= 3 && zh_votes >= (en_votes * 12 / 10) && total_cjk >= (total_latin * 11 / 10) {
        return Some(("zh", "en", format!("{detail} decision=zh->en")));
    }
    if en_votes >= 3 && en_votes >= (zh_votes * 12 / 10) && total_latin >= (total_cjk * 11 / 10) {
        return Some(("en", "zh", format!("{detail} decision=en->zh")));
    }
    if total_cjk >= (total_latin * 5 / 4) && total_cjk >= 20 {
        return Some(("zh", "en", format!("{detail} decision=zh->en(low_conf)")));
    }
    if total_latin >= (total_cjk * 5 / 4) && total_latin >= 20 {
        return Some(("en", "zh", format!("{detail} decision=en->zh(low_conf)")));
    }
    if zh_votes > en_votes {
        return Some(("zh", "en", format!("{detail} decision=zh->en(weak_vote)")));
    }
    if en_votes > zh_votes {
        return Some(("en", "zh", format!("{detail} decision=en->zh(weak_vote)")));
    }
    if total_cjk > total_latin {
        Some(("zh", "en", format!("{detail} decision=zh->en(weak_char)")))
    } else {
        Some(("en", "zh", format!("{detail} decision=en->zh(weak_char)")))
    }
}

/// Reason a TU was or wasn't sent to the translation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    SentinelOnly,
    OtherScript,
    AlreadyZh,
    NoLatin,
    NonEnglishLatin,
    AlreadyEn,
    NoCjk,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Empty => "empty",
            SkipReason::SentinelOnly => "sentinel_only",
            SkipReason::OtherScript => "other_script",
            SkipReason::AlreadyZh => "already_zh",
            SkipReason::NoLatin => "no_latin",
            SkipReason::NonEnglishLatin => "non_english_latin",
            SkipReason::AlreadyEn => "already_en",
            SkipReason::NoCjk => "no_cjk",
        }
    }
}

/// Decides whether a TU needs translation, given the detected source
/// language. `Ok(None)` means translate; `Ok(Some(reason))` means skip.
pub fn should_translate_tu(tu: &TranslationUnit, source_lang: &str) -> Option<SkipReason> {
    let t = text_for_lang(&tu.source_surface);
    if t.is_empty() {
        return Some(SkipReason::Empty);
    }
    if any_sentinel().replace_all(&tu.frozen_surface, "").trim().is_empty() {
        return Some(SkipReason::SentinelOnly);
    }

    let other = other_script_count(&t) as i64;
    let cjk = cjk_re().find_iter(&t).count() as i64;
    let latin = latin_re().find_iter(&t).count() as i64;
    let latin_ext = latin_ext_re().find_iter(&t).count() as i64;

    if other > 0 {
        let signal = cjk + latin + latin_ext;
        if signal == 0 {
            return Some(SkipReason::OtherScript);
        }
    }

    match source_lang {
        "en" => {
            if latin == 0 && cjk > 0 {
                return Some(SkipReason::AlreadyZh);
            }
            if latin == 0 {
                return Some(SkipReason::NoLatin);
            }
            if latin_ext >= 2 && !looks_like_english(&t) {
                return Some(SkipReason::NonEnglishLatin);
            }
            None
        }
        "zh" => {
            if cjk == 0 && latin > 0 {
                return Some(SkipReason::AlreadyEn);
            }
            if cjk == 0 {
                return Some(SkipReason::NoCjk);
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_for_lang_strips_sentinels_and_collapses_space() {
        let t = text_for_lang("hello   <<MT_TAB>>  world");
        assert_eq!(t, "hello world");
    }

    #[test]
    fn number_tokens_counts_multiset() {
        let counts = number_tokens_in_text("clause 7 and clause 7 but not 7.1");
        assert_eq!(counts.get("7"), Some(&2));
        assert_eq!(counts.get("7.1"), Some(&1));
    }

    #[test]
    fn looks_like_english_detects_common_words() {
        assert!(looks_like_english("this is a test of the system"));
        assert!(!looks_like_english("xyzzy plugh qux"));
    }

    #[test]
    fn should_translate_skips_sentinel_only_tu() {
        let tu = crate::ir::TranslationUnit::new(
            1,
            "word/document.xml".into(),
            "x#w:p@0".into(),
            vec![],
            vec![],
            "<<MT_NT:0001>>".into(),
            "<<MT_NT:0001>>".into(),
            Default::default(),
        );
        assert_eq!(should_translate_tu(&tu, "en"), Some(SkipReason::SentinelOnly));
    }

    #[test]
    fn preview_for_log_collapses_and_truncates() {
        let p = preview_for_log("hello\n\n  world  foo", 9);
        assert_eq!(p, "hello wor…");
    }

    #[test]
    fn try_extract_json_obj_skips_leading_prose() {
        let v = try_extract_json_obj("sure, here you go: {\"ok\": true, \"score\": 4} thanks").unwrap();
        assert_eq!(v["ok"], serde_json::json!(true));
        assert_eq!(v["score"], serde_json::json!(4));
    }

    #[test]
    fn try_extract_json_obj_none_when_no_brace() {
        assert!(try_extract_json_obj("no json here").is_none());
    }

    #[test]
    fn should_translate_allows_plain_english() {
        let tu = crate::ir::TranslationUnit::new(
            1,
            "word/document.xml".into(),
            "x#w:p@0".into(),
            vec![],
            vec![],
            "This is a plain English sentence.".into(),
            "This is a plain English sentence.".into(),
            Default::default(),
        );
        assert_eq!(should_translate_tu(&tu, "en"), None);
    }
}
