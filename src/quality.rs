//! Heuristic quality evaluation for a candidate translation (§6).
//!
//! Runs after protocol normalization has already guaranteed sentinel/NT
//! validity. These checks look for things normalization can't fix: the
//! model leaving text untranslated, echoing the source, injecting
//! conditions that weren't there, leaking glossary terms into the wrong
//! script, and so on. Findings are tags; [`hard_issues`] is the subset
//! that forces a repair round rather than just a logged note.

use crate::freezer::unfreeze_text;
use crate::ir::TranslationUnit;
use crate::sentinels::any_sentinel;
use crate::textutil::{cjk_re, latin_ext_re, latin_re, looks_like_english, looks_like_entity_name, text_for_lang};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

macro_rules! static_re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pat).unwrap())
        }
    };
}

static_re!(zero_width_re, r"[\u{200b}\u{200c}\u{200d}\u{2060}]");
static_re!(latin_phrase_re, r"[A-Za-z][A-Za-z0-9 ,.;:'\x22()/\\-]{30,}");
static_re!(latin_phrase_short_re, r"[A-Za-z][A-Za-z0-9 ,.;:'\x22()/\\-]{12,}");
static_re!(
    unexpected_script_char_re,
    r"[\u{0900}-\u{097F}\u{0980}-\u{09FF}\u{0600}-\u{06FF}\u{0400}-\u{04FF}\u{0370}-\u{03FF}\u{0590}-\u{05FF}\u{0E00}-\u{0E7F}\u{AC00}-\u{D7AF}\u{3040}-\u{309F}\u{30A0}-\u{30FF}]"
);
static_re!(
    prompt_tag_re,
    r"(?i)\[(?:/?(?:CONTEXT|TEXT|TARGET|SRC|DRAFT|DOC_CONTEXT|CURRENT_PROBLEMS|STRUCTURE|EXCERPTS|TERMS|NEIGHBOR_SRC_PREV|NEIGHBOR_SRC_NEXT|BAD_OUTPUT|BAD_OUTPUT_SEG|SRC_SEG))\]"
);
static_re!(
    prompt_kv_re,
    r"(?i)\b(?:Domain|Document\s+type|Document\s+summary|Target\s+writing\s+style|Style\s+guide|Glossary|Context\s*\(|Relevant\s+excerpts|Text\s+to\s+translate|Source\s+text|Draft\s+translation|Bad\s+output|Structure\s+hints|Previous\s+source\s+paragraph|Next\s+source\s+paragraph)\b\s*:"
);
static_re!(
    zh_bad_ref_placeholder_re,
    r"第\s*(?:X|x|\?|\*|[IVXLCDM]{1,8})\s*(?:条|款|节|段|章|篇)"
);
static_re!(zh_bad_ref_missing_id_re, r"第\s*(?:条|款|节|段|章|篇)");
static_re!(
    en_cond_re,
    r"(?i)\b(?:if|unless|provided\s+that|in\s+the\s+event|to\s+the\s+extent|subject\s+to|if\s+applicable|if\s+specified)\b"
);
static_re!(zh_cond_inject_re, r"(?:如果|若|如)\s*适用");
static_re!(whitespace_re, r"\s+");
static_re!(ascii_word2_re, r"[A-Za-z]{2,}");
static_re!(sentence_split_re, r"[。！？；：.!?;:]");
static_re!(word4_re, r"[A-Za-z]{4,}");

/// The subset of quality issue tags that force a repair round rather than
/// only being logged.
pub fn hard_quality_issues() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "protocol_error",
            "empty_output",
            "prompt_artifact",
            "unexpected_script",
            "zero_width_chars",
            "repeated_char_run",
            "repeated_sentence",
            "bad_reference_placeholder",
            "variable_marker_missing",
            "too_short",
            "coverage_low",
            "over_expansion",
            "unjustified_condition",
            "it_default_sense",
            "looks_untranslated",
            "english_skeleton",
            "mixed_language",
            "untranslated_english",
            "source_echo",
            "duplicate_paragraph",
            "stitch_duplicate_chunk",
        ]
        .into_iter()
        .collect()
    })
}

/// Filters `issues` to the hard subset plus any `glossary_leakage:*` tag.
pub fn hard_issues(issues: &[String]) -> Vec<String> {
    issues
        .iter()
        .filter(|s| hard_quality_issues().contains(s.as_str()) || s.starts_with("glossary_leakage:"))
        .cloned()
        .collect()
}

fn norm_ws(s: &str) -> String {
    whitespace_re().replace_all(s.trim(), " ").to_string()
}

/// Finds 13+ consecutive identical characters (`(.)\1{12,}` in the
/// reference grammar — backreferences aren't supported by this crate's
/// regex engine, so this scans runs by hand).
fn has_long_repeat_run(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(mut prev) = chars.next() else { return false };
    let mut run = 1usize;
    for c in chars {
        if c == prev {
            run += 1;
            if run >= 13 {
                return true;
            }
        } else {
            prev = c;
            run = 1;
        }
    }
    false
}

fn has_word_boundary_match(re_word: &str, haystack: &str) -> bool {
    let pat = format!(r"(?i)\b{}\b", regex::escape(re_word));
    Regex::new(&pat).map(|r| r.is_match(haystack)).unwrap_or(false)
}

/// Evaluates a candidate translation against its source unit and returns
/// the sorted, deduplicated set of issue tags found.
pub fn quality_issues(
    tu: &TranslationUnit,
    translated: &str,
    source_lang: &str,
    target_lang: &str,
    glossary_dict: Option<&HashMap<String, String>>,
) -> Vec<String> {
    if translated.is_empty() {
        return vec!["empty_output".to_string()];
    }

    let mut issues: Vec<String> = Vec::new();

    let tgt_unfrozen = unfreeze_text(translated, &tu.nt_map);
    let plain_out = any_sentinel().replace_all(&tgt_unfrozen, " ").into_owned();
    let plain_src = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();

    if zero_width_re().is_match(&plain_out) {
        issues.push("zero_width_chars".to_string());
    }
    if has_long_repeat_run(&plain_out) {
        issues.push("repeated_char_run".to_string());
    }

    let out_has_prompt = prompt_tag_re().is_match(&plain_out) || prompt_kv_re().is_match(&plain_out);
    let src_has_prompt = prompt_tag_re().is_match(&plain_src) || prompt_kv_re().is_match(&plain_src);
    if out_has_prompt && !src_has_prompt {
        issues.push("prompt_artifact".to_string());
    }

    let tgt = target_lang.to_lowercase();
    let src = source_lang.to_lowercase();

    if tgt.starts_with("zh") {
        let allowed: HashSet<&str> = unexpected_script_char_re()
            .find_iter(&plain_src)
            .map(|m| m.as_str())
            .collect();
        let found: HashSet<&str> = unexpected_script_char_re()
            .find_iter(&plain_out)
            .map(|m| m.as_str())
            .collect();
        if found.difference(&allowed).next().is_some() {
            issues.push("unexpected_script".to_string());
        }

        if plain_out.contains("默认") && has_word_boundary_match("Default", &plain_src) {
            let qualified = Regex::new(
                r"(?i)\bby\s+default\b|\bdefault\s+settings?\b|\bdefault\s+value\b|\bdefault\s+configuration\b",
            )
            .unwrap()
            .is_match(&plain_src);
            if !qualified {
                issues.push("it_default_sense".to_string());
            }
        }

        if zh_bad_ref_missing_id_re().is_match(&plain_out) || zh_bad_ref_placeholder_re().is_match(&plain_out) {
            issues.push("bad_reference_placeholder".to_string());
        }

        for ch in ["X", "Y", "Z"] {
            if has_word_boundary_match(ch, &plain_src) && !has_word_boundary_match(ch, &plain_out) {
                issues.push("variable_marker_missing".to_string());
                break;
            }
        }

        let src_latin = latin_re().find_iter(&plain_src).count();
        let src_cjk = cjk_re().find_iter(&plain_src).count();
        let out_latin = latin_re().find_iter(&plain_out).count();
        let out_cjk = cjk_re().find_iter(&plain_out).count();
        let _out_latin_ext = latin_ext_re().find_iter(&plain_out).count();

        if src.starts_with("en") && src_latin >= 12 {
            if out_cjk <= (src_latin as f64 * 0.08).max(2.0) as usize
                && out_latin >= (src_latin as f64 * 0.35).max(8.0) as usize
            {
                issues.push("looks_untranslated".to_string());
            }

            if src_latin >= 120 {
                if out_cjk <= (src_latin as f64 * 0.25).max(18.0) as usize {
                    issues.push("too_short".to_string());
                    if out_cjk <= (src_latin as f64 * 0.18).max(14.0) as usize {
                        issues.push("coverage_low".to_string());
                    }
                }
            }
        }

        let out_low = norm_ws(&plain_out).to_lowercase();
        let src_low = norm_ws(&plain_src).to_lowercase();

        let english_like = ascii_word2_re()
            .find_iter(&plain_out)
            .filter(|m| matches!(m.as_str().to_lowercase().as_str(), "the" | "and" | "of" | "to"))
            .count();
        if out_latin >= 18 && out_cjk >= 6 {
            issues.push("mixed_language".to_string());
        }
        if out_latin >= 24 && (english_like >= 1 || looks_like_english(&plain_out)) {
            issues.push("untranslated_english".to_string());
        }

        for m in latin_phrase_re().find_iter(&plain_out) {
            let ph = norm_ws(m.as_str());
            if ph.len() < 30 {
                continue;
            }
            if looks_like_entity_name(&ph) {
                continue;
            }
            issues.push("english_skeleton".to_string());
            break;
        }

        for m in latin_phrase_short_re().find_iter(&plain_out) {
            let ph_raw = m.as_str();
            let ph = norm_ws(ph_raw).to_lowercase();
            if ph.len() < 12 {
                continue;
            }
            if !src_low.contains(&ph) || !out_low.contains(&ph) {
                continue;
            }
            if looks_like_entity_name(ph_raw) {
                continue;
            }
            issues.push("source_echo".to_string());
            break;
        }

        let src_len = norm_ws(&plain_src).chars().count();
        let out_len = norm_ws(&plain_out).chars().count();
        if src_len >= 40 && out_len >= ((src_len as f64) * 2.8) as usize {
            issues.push("over_expansion".to_string());
        }

        if zh_cond_inject_re().is_match(&plain_out) && !en_cond_re().is_match(&plain_src) {
            issues.push("unjustified_condition".to_string());
        }

        if src_len >= 80 && has_repeated_sentence(&plain_out) {
            issues.push("repeated_sentence".to_string());
        }
    } else if tgt.starts_with("en") {
        let allowed: HashSet<&str> = unexpected_script_char_re()
            .find_iter(&plain_src)
            .map(|m| m.as_str())
            .collect();
        let found: HashSet<&str> = unexpected_script_char_re()
            .find_iter(&plain_out)
            .map(|m| m.as_str())
            .collect();
        if found.difference(&allowed).next().is_some() {
            issues.push("unexpected_script".to_string());
        }

        let src_cjk = cjk_re().find_iter(&plain_src).count();
        let out_words = ascii_word2_re().find_iter(&plain_out).count();

        if src.starts_with("zh") && src_cjk > 0 {
            if out_words == 0 && src_cjk >= 12 && plain_out.trim().chars().count() >= 6 {
                issues.push("looks_untranslated".to_string());
            }

            if src_cjk >= 60 && out_words <= (src_cjk as f64 * 0.25).max(10.0) as usize {
                issues.push("too_short".to_string());
                if src_cjk >= 120 && out_words <= (src_cjk as f64 * 0.18).max(16.0) as usize {
                    issues.push("coverage_low".to_string());
                }
            }
        }

        let src_low = norm_ws(&plain_src).to_lowercase();
        let out_low = norm_ws(&plain_out).to_lowercase();

        for m in latin_phrase_short_re().find_iter(&plain_out) {
            let ph_raw = m.as_str();
            let ph = norm_ws(ph_raw).to_lowercase();
            if ph.len() < 12 {
                continue;
            }
            if !src_low.contains(&ph) || !out_low.contains(&ph) {
                continue;
            }
            if looks_like_entity_name(ph_raw) {
                continue;
            }
            issues.push("source_echo".to_string());
            break;
        }

        let src_len = norm_ws(&plain_src).chars().count();
        if src_len >= 80 && has_repeated_sentence(&plain_out) {
            issues.push("repeated_sentence".to_string());
        }
    }

    if let Some(glossary) = glossary_dict {
        if !glossary.is_empty() {
            let src_plain = text_for_lang(&tu.source_surface);
            let out_plain = text_for_lang(&tgt_unfrozen);
            let src_low = src_plain.to_lowercase();

            if src.starts_with("en") && tgt.starts_with("zh") {
                for (src_term, dst_term) in glossary.iter() {
                    let st = src_term.trim();
                    let dt = dst_term.trim();
                    if st.is_empty() || dt.is_empty() {
                        continue;
                    }
                    if !latin_re().is_match(st) || !cjk_re().is_match(dt) {
                        continue;
                    }
                    let words: Vec<String> = word4_re()
                        .find_iter(st)
                        .map(|m| m.as_str().to_lowercase())
                        .collect();
                    if words.len() < 2 {
                        continue;
                    }
                    if dt.chars().count() < 6 {
                        continue;
                    }
                    if !out_plain.contains(dt) {
                        continue;
                    }
                    if Regex::new(&format!("(?i){}", regex::escape(st))).unwrap().is_match(&src_plain) {
                        continue;
                    }
                    if words.iter().any(|w| has_word_boundary_match(w, &src_low)) {
                        continue;
                    }
                    issues.push(format!("glossary_leakage:{}", truncate_chars(st, 32)));
                    break;
                }
            }

            if src.starts_with("zh") && tgt.starts_with("en") {
                for (src_term, dst_term) in glossary.iter() {
                    let st = src_term.trim();
                    let dt = dst_term.trim();
                    if st.is_empty() || dt.is_empty() {
                        continue;
                    }
                    if latin_re().is_match(st) || !latin_re().is_match(dt) {
                        continue;
                    }
                    if st.chars().count() < 4 || dt.chars().count() < 8 {
                        continue;
                    }
                    if !out_plain.contains(dt) {
                        continue;
                    }
                    if src_plain.contains(st) {
                        continue;
                    }
                    issues.push(format!("glossary_leakage:{}", truncate_chars(dt, 32)));
                    break;
                }
            }
        }
    }

    issues.sort();
    issues.dedup();
    issues
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn has_repeated_sentence(plain_out: &str) -> bool {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for piece in sentence_split_re().split(plain_out) {
        let s = norm_ws(piece);
        if s.chars().count() < 12 {
            continue;
        }
        *freq.entry(s).or_insert(0) += 1;
    }
    freq.values().any(|&v| v >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TranslationUnit;
    use std::collections::HashMap;

    fn tu_with_source(source: &str) -> TranslationUnit {
        TranslationUnit::new(
            1,
            "word/document.xml".to_string(),
            "p#w:p@0".to_string(),
            Vec::new(),
            Vec::new(),
            source.to_string(),
            source.to_string(),
            HashMap::new(),
        )
    }

    #[test]
    fn empty_output_is_flagged() {
        let tu = tu_with_source("hello");
        assert_eq!(quality_issues(&tu, "", "en", "zh", None), vec!["empty_output".to_string()]);
    }

    #[test]
    fn untranslated_english_into_zh_is_flagged() {
        let src = "This agreement shall remain in full force and effect for the entire duration of the contract.";
        let tu = tu_with_source(src);
        let issues = quality_issues(&tu, src, "en", "zh", None);
        assert!(issues.contains(&"looks_untranslated".to_string()));
    }

    #[test]
    fn repeated_char_run_is_flagged() {
        let tu = tu_with_source("hello");
        let bad = format!("好的{}", "啊".repeat(13));
        let issues = quality_issues(&tu, &bad, "en", "zh", None);
        assert!(issues.contains(&"repeated_char_run".to_string()));
    }

    #[test]
    fn zero_width_chars_are_flagged() {
        let tu = tu_with_source("hello");
        let bad = "你好\u{200b}世界";
        let issues = quality_issues(&tu, bad, "en", "zh", None);
        assert!(issues.contains(&"zero_width_chars".to_string()));
    }

    #[test]
    fn well_formed_translation_is_clean() {
        let tu = tu_with_source("Hello there.");
        let issues = quality_issues(&tu, "你好。", "en", "zh", None);
        assert!(!issues.contains(&"empty_output".to_string()));
        assert!(!issues.contains(&"zero_width_chars".to_string()));
        assert!(!issues.contains(&"repeated_char_run".to_string()));
    }

    #[test]
    fn hard_issues_filters_to_hard_and_glossary() {
        let issues = vec![
            "empty_output".to_string(),
            "not_a_real_issue".to_string(),
            "glossary_leakage:Foo".to_string(),
        ];
        let hard = hard_issues(&issues);
        assert_eq!(
            hard,
            vec!["empty_output".to_string(), "glossary_leakage:Foo".to_string()]
        );
    }
}
