//! The deterministic normalizer and validator.
//!
//! A model's raw response is run through [`normalize_candidate_translation`]
//! before it is ever accepted: whitespace is canonicalized, raw control
//! characters are folded back into `<<MT_TAB>>`/`<<MT_BR>>`, prompt leakage
//! is stripped, dropped numbers and reference placeholders are repaired
//! where the repair is unambiguous, and scripts the target language
//! shouldn't contain are removed. [`validate_sentinels`] then re-checks the
//! sentinel/number invariants and fails loudly — never silently — for
//! anything normalization couldn't fix.

use crate::error::ProtocolViolation;
use crate::freezer::unfreeze_text;
use crate::ir::TranslationUnit;
use crate::sentinels::{any_sentinel, control_tokens_from_text, nt_token, nt_token_re, BR, CONTROL_TOKENS, TAB};
use crate::textutil::number_tokens_in_text;
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

// Do not include raw tab (	) here: tabs are represented by the TAB sentinel.
static_re!(weird_ws_re, r"[\u{000B}\u{000C}\u{00A0}\u{2000}-\u{200A}\u{202F}\u{205F}\u{3000}\u{FEFF}]");
static_re!(multi_space_re, r"[ ]{2,}");
static_re!(zh_space_before_punct_re, r"\s+([，。！？；：、）】》」』])");
static_re!(zh_space_after_open_punct_re, r"([（【《「『])\s+");
static_re!(en_space_before_punct_re, r"\s+([,.;:!?])");
static_re!(en_space_after_open_punct_re, r"([(\[{])\s+");
static_re!(en_space_before_close_punct_re, r"\s+([)\]}])");
static_re!(unexpected_script_char_re, r"[\u{0900}-\u{097F}\u{0980}-\u{09FF}\u{0600}-\u{06FF}\u{0400}-\u{04FF}\u{0370}-\u{03FF}\u{0590}-\u{05FF}\u{0E00}-\u{0E7F}\u{AC00}-\u{D7AF}\u{3040}-\u{309F}\u{30A0}-\u{30FF}]");
static_re!(number_value_re, r"^\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?$");
static_re!(section_ref_re, r"(?i)\bSection\s+(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)\b");
static_re!(article_ref_re, r"(?i)\bArticle\s+(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)\b");
static_re!(clause_ref_word_re, r"(?i)\bClause\s+(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)\b");
static_re!(para_ref_re, r"(?i)\bParagraph\s+(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)\b");
static_re!(schedule_ref_re, r"(?i)\bSchedule\s+(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)\b");
static_re!(
    prompt_tag_re,
    r"(?i)\[/?(?:CONTEXT|TEXT|TARGET|SRC|DRAFT|DOC_CONTEXT|CURRENT_PROBLEMS|STRUCTURE|EXCERPTS|TERMS|NEIGHBOR_SRC_PREV|NEIGHBOR_SRC_NEXT|BAD_OUTPUT|BAD_OUTPUT_SEG|SRC_SEG)\]"
);
static_re!(
    prompt_kv_re,
    r"(?i)\b(?:Domain|Document\s+type|Document\s+summary|Target\s+writing\s+style|Style\s+guide|Glossary|Context\s*\(|Relevant\s+excerpts|Text\s+to\s+translate|Source\s+text|Draft\s+translation|Bad\s+output|Structure\s+hints|Previous\s+source\s+paragraph|Next\s+source\s+paragraph)\b\s*:"
);
static_re!(zh_bad_ref_placeholder_re, r"第\s*(?:X|x|\?|\*|[IVXLCDM]{1,8})\s*(条|款|节|段|章|篇)");
static_re!(zh_bad_ref_missing_id_re, r"第\s*(条|款|节|段|章|篇)");

/// Splits `text` into alternating plain/sentinel pieces, with the first and
/// last always plain (possibly empty) so indices line up with the source's
/// split regardless of leading/trailing sentinels.
pub(crate) fn split_by_sentinels(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut parts = Vec::new();
    let mut pos = 0;
    for m in any_sentinel().find_iter(text) {
        parts.push(text[pos..m.start()].to_string());
        parts.push(m.as_str().to_string());
        pos = m.end();
    }
    parts.push(text[pos..].to_string());
    parts
}

pub(crate) fn split_edge_ws(text: &str) -> (String, String, String) {
    let lead_len: usize = text
        .char_indices()
        .take_while(|(_, c)| c.is_whitespace())
        .map(|(_, c)| c.len_utf8())
        .sum();
    let trail_len: usize = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_whitespace())
        .map(|(_, c)| c.len_utf8())
        .sum();
    if lead_len + trail_len >= text.len() {
        // whole string is whitespace (or empty): treat it all as leading.
        return (text.to_string(), String::new(), String::new());
    }
    let core_start = lead_len;
    let core_end = text.len() - trail_len;
    (
        text[..core_start].to_string(),
        text[core_start..core_end].to_string(),
        text[core_end..].to_string(),
    )
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// `regex` has no lookaround, so whitespace runs strictly between two CJK
/// characters are found by hand (the Python original used a lookaround
/// pattern for the same check).
fn has_cjk_inner_space(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            let start = i;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if start > 0 && i < chars.len() && is_cjk(chars[start - 1]) && is_cjk(chars[i]) {
                return true;
            }
        } else {
            i += 1;
        }
    }
    false
}

fn strip_cjk_inner_space(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            let start = i;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            let strip = start > 0 && i < chars.len() && is_cjk(chars[start - 1]) && is_cjk(chars[i]);
            if !strip {
                out.extend(&chars[start..i]);
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// True when `part` (one element of [`split_by_sentinels`]'s output) is
/// itself a whole sentinel token rather than plain text.
fn is_sentinel_part(part: &str) -> bool {
    any_sentinel().find(part).map(|m| m.start() == 0 && m.end() == part.len()).unwrap_or(false)
}

fn is_number_value(s: &str) -> bool {
    number_value_re().is_match(s)
}

fn strip_unexpected_sentinels(text: &str, allowed: &HashSet<&str>) -> String {
    if text.is_empty() {
        return String::new();
    }
    any_sentinel()
        .replace_all(text, |caps: &regex::Captures| {
            let tok = &caps[0];
            if allowed.contains(tok) {
                tok.to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Deletes characters from a script the target language has no business
/// containing, unless that script was already present in the source (some
/// contracts quote foreign-language terms verbatim).
fn strip_unexpected_scripts_for_tu(tu: &TranslationUnit, translated: &str, target_lang: &str) -> (String, bool) {
    if translated.is_empty() || !target_lang.to_lowercase().starts_with("zh") {
        return (translated.to_string(), false);
    }
    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();
    let allowed_chars: HashSet<char> = unexpected_script_char_re()
        .find_iter(&src_plain)
        .flat_map(|m| m.as_str().chars())
        .collect();

    let mut changed = false;
    let mut out = String::with_capacity(translated.len());
    for part in split_by_sentinels(translated) {
        if is_sentinel_part(&part) {
            out.push_str(&part);
            continue;
        }
        if part.is_empty() {
            continue;
        }
        let mut kept = String::with_capacity(part.len());
        for ch in part.chars() {
            if unexpected_script_char_re().is_match(&ch.to_string()) && !allowed_chars.contains(&ch) {
                changed = true;
                continue;
            }
            kept.push(ch);
        }
        if kept != part {
            changed = true;
        }
        out.push_str(&kept);
    }
    (out, changed)
}

fn normalize_model_output(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let spaced = weird_ws_re().replace_all(text, " ");
    // Raw newlines/tabs are NOT normalized here: they are protocol violations
    // that must be repaired deterministically or fail validation.
    let despaced = strip_cjk_inner_space(&spaced);
    despaced.trim_matches(' ').to_string()
}

fn normalize_sentinel_edge_whitespace_to_source(tu: &TranslationUnit, translated: &str) -> String {
    if translated.is_empty() {
        return translated.to_string();
    }
    let src_parts = split_by_sentinels(&tu.frozen_surface);
    let tgt_parts = split_by_sentinels(translated);
    if src_parts.len() != tgt_parts.len() {
        return translated.to_string();
    }
    let mut out = String::with_capacity(translated.len());
    for (src_part, tgt_part) in src_parts.iter().zip(tgt_parts.iter()) {
        if is_sentinel_part(src_part) {
            out.push_str(src_part);
            continue;
        }
        let (src_pre, _src_core, src_suf) = split_edge_ws(src_part);
        let (tgt_pre, tgt_core, tgt_suf) = split_edge_ws(tgt_part);
        let has_raw_control = [&tgt_pre, &tgt_suf]
            .iter()
            .any(|s| s.contains('\r') || s.contains('\n') || s.contains('\t'));
        if has_raw_control {
            out.push_str(tgt_part);
            continue;
        }
        out.push_str(&src_pre);
        out.push_str(&tgt_core);
        out.push_str(&src_suf);
    }
    out
}

fn normalize_inner_whitespace_for_lang(
    tu: &TranslationUnit,
    translated: &str,
    target_lang: &str,
) -> (String, Vec<String>, bool) {
    if translated.is_empty() {
        return (String::new(), Vec::new(), false);
    }
    let _ = tu;
    let tgt = target_lang.to_lowercase();
    let mut out = String::with_capacity(translated.len());
    let mut flags = HashSet::new();
    let mut changed = false;

    for part in split_by_sentinels(translated) {
        if is_sentinel_part(&part) {
            out.push_str(&part);
            continue;
        }
        if part.is_empty() {
            continue;
        }
        let (pre, core, suf) = split_edge_ws(&part);
        let mut cur = core.clone();
        if tgt.starts_with("zh") {
            if has_cjk_inner_space(&cur) {
                flags.insert("cjk_inner_space".to_string());
                cur = strip_cjk_inner_space(&cur);
            }
            if zh_space_before_punct_re().is_match(&cur) || zh_space_after_open_punct_re().is_match(&cur) {
                flags.insert("space_punct".to_string());
            }
            cur = zh_space_before_punct_re().replace_all(&cur, "$1").into_owned();
            cur = zh_space_after_open_punct_re().replace_all(&cur, "$1").into_owned();
        } else {
            if multi_space_re().is_match(&cur) {
                flags.insert("multi_space".to_string());
                cur = multi_space_re().replace_all(&cur, " ").into_owned();
            }
            if en_space_before_punct_re().is_match(&cur)
                || en_space_after_open_punct_re().is_match(&cur)
                || en_space_before_close_punct_re().is_match(&cur)
            {
                flags.insert("space_punct".to_string());
            }
            cur = en_space_before_punct_re().replace_all(&cur, "$1").into_owned();
            cur = en_space_after_open_punct_re().replace_all(&cur, "$1").into_owned();
            cur = en_space_before_close_punct_re().replace_all(&cur, "$1").into_owned();
        }
        if cur != core {
            changed = true;
        }
        out.push_str(&pre);
        out.push_str(&cur);
        out.push_str(&suf);
    }

    let mut flags: Vec<String> = flags.into_iter().collect();
    flags.sort();
    (out, flags, changed)
}

fn int_to_zh_numeral(n: i64) -> String {
    const DIGITS: [char; 10] = ['零', '一', '二', '三', '四', '五', '六', '七', '八', '九'];
    if n == 0 {
        return DIGITS[0].to_string();
    }
    if n < 0 {
        return format!("负{}", int_to_zh_numeral(-n));
    }
    let mut n = n;
    let units = [(1000i64, '千'), (100, '百'), (10, '十')];
    let mut parts: Vec<String> = Vec::new();
    let mut started = false;
    for (base, unit) in units {
        let d = n / base;
        n %= base;
        if d != 0 {
            started = true;
            if base == 10 && d == 1 && parts.is_empty() {
                parts.push(unit.to_string());
            } else {
                parts.push(format!("{}{}", DIGITS[d as usize], unit));
            }
        } else if started && n != 0 && parts.last().map(|p| p != "零").unwrap_or(true) {
            parts.push("零".to_string());
        }
    }
    if n != 0 {
        parts.push(DIGITS[n as usize].to_string());
    }
    let mut out = parts.join("");
    out = out.replace("零零", "零");
    if let Some(stripped) = out.strip_suffix('零') {
        out = stripped.to_string();
    }
    out
}

fn counter_sub(a: &HashMap<String, i64>, b: &HashMap<String, i64>) -> HashMap<String, i64> {
    let mut out = a.clone();
    for (k, v) in b {
        let e = out.entry(k.clone()).or_insert(0);
        *e -= v;
        if *e <= 0 {
            out.remove(k);
        }
    }
    out
}

fn to_i64_counter(m: &HashMap<String, usize>) -> HashMap<String, i64> {
    m.iter().map(|(k, v)| (k.clone(), *v as i64)).collect()
}

fn sanitize_number_tokens_to_match_source(tu: &TranslationUnit, translated: &str, target_lang: &str) -> String {
    if translated.is_empty() {
        return String::new();
    }
    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();
    let required = to_i64_counter(&number_tokens_in_text(&src_plain));

    let mut nt_contrib: HashMap<String, i64> = HashMap::new();
    for m in any_sentinel().find_iter(translated) {
        let tok = m.as_str();
        if nt_token_re().find(tok).map(|mm| mm.as_str() == tok).unwrap_or(false) {
            if let Some(original) = tu.nt_map.get(tok) {
                for (k, v) in number_tokens_in_text(original) {
                    *nt_contrib.entry(k).or_insert(0) += v as i64;
                }
            }
        }
    }

    let needed_plain = counter_sub(&required, &nt_contrib);
    let mut remaining = needed_plain.clone();

    let mut out = String::with_capacity(translated.len());
    for part in split_by_sentinels(translated) {
        if is_sentinel_part(&part) {
            out.push_str(&part);
            continue;
        }
        if part.is_empty() {
            continue;
        }
        if required.is_empty() {
            out.push_str(&number_token_strip(&part));
            continue;
        }
        let mut rebuilt = String::with_capacity(part.len());
        let mut pos = 0;
        for m in number_token_iter(&part) {
            rebuilt.push_str(&part[pos..m.0]);
            let tok = &part[m.0..m.1];
            if remaining.get(tok).copied().unwrap_or(0) > 0 {
                rebuilt.push_str(tok);
                *remaining.get_mut(tok).unwrap() -= 1;
            }
            pos = m.1;
        }
        rebuilt.push_str(&part[pos..]);
        out.push_str(&rebuilt);
    }

    let count_numbers_after = |text: &str| -> HashMap<String, i64> {
        let unfrozen = unfreeze_text(text, &tu.nt_map);
        let plain = any_sentinel().replace_all(&unfrozen, " ").into_owned();
        to_i64_counter(&number_tokens_in_text(&plain))
    };

    let mut cur = count_numbers_after(&out);
    let mut missing = counter_sub(&required, &cur);
    if missing.is_empty() {
        return out;
    }

    if target_lang == "zh" {
        for (tok, cnt) in missing.clone() {
            if cnt <= 0 || !tok.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if tok != "0" && tok.starts_with('0') {
                continue;
            }
            let Ok(n) = tok.parse::<i64>() else { continue };
            let cn = int_to_zh_numeral(n);
            if cn.is_empty() {
                continue;
            }
            let pat = Regex::new(&format!(r"第\s*{}\s*(条|节|款|段|章|篇)", regex::escape(&cn))).unwrap();
            let mut replaced = 0i64;
            let new_out = {
                let mut n_left = cnt;
                pat.replace_all(&out, |caps: &regex::Captures| {
                    if n_left > 0 {
                        n_left -= 1;
                        replaced += 1;
                        format!("第{tok}{}", &caps[1])
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned()
            };
            if replaced > 0 {
                cur = count_numbers_after(&new_out);
                missing = counter_sub(&required, &cur);
                if missing.is_empty() {
                    return new_out;
                }
                return finish_number_sanitize(tu, new_out, target_lang, &required, &mut missing, &src_plain, &count_numbers_after);
            }
        }

        let lead = src_plain.chars().take(32).collect::<String>();
        for (tok, cnt) in missing.clone() {
            if cnt <= 0 || tok.len() != 4 || !tok.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let bounded = Regex::new(&format!(r"(?:^|[^\d]){}(?:[^\d]|$)", regex::escape(&tok))).unwrap();
            if !bounded.is_match(&lead) {
                continue;
            }
            let mut inserted_out = None;
            for part in split_by_sentinels(&out) {
                if is_sentinel_part(&part) {
                    continue;
                }
                let (pre, core, suf) = split_edge_ws(&part);
                if core.trim().is_empty() {
                    continue;
                }
                let ins = format!("{tok}年");
                let replacement = format!("{pre}{ins}{core}{suf}");
                inserted_out = Some(out.replacen(&part, &replacement, 1));
                break;
            }
            if let Some(new_out) = inserted_out {
                out = new_out;
                cur = count_numbers_after(&out);
                missing = counter_sub(&required, &cur);
                if missing.is_empty() {
                    return out;
                }
            }
        }
    }

    finish_number_sanitize(tu, out, target_lang, &required, &mut missing, &src_plain, &count_numbers_after)
}

fn finish_number_sanitize(
    _tu: &TranslationUnit,
    mut out: String,
    target_lang: &str,
    _required: &HashMap<String, i64>,
    missing: &mut HashMap<String, i64>,
    src_plain: &str,
    _count_numbers_after: &dyn Fn(&str) -> HashMap<String, i64>,
) -> String {
    let ref_kind_for_number = |num: &str| -> Option<&'static str> {
        if section_ref_re().captures_iter(src_plain).any(|c| &c[1] == num) {
            return Some("section");
        }
        if article_ref_re().captures_iter(src_plain).any(|c| &c[1] == num) {
            return Some("article");
        }
        if clause_ref_word_re().captures_iter(src_plain).any(|c| &c[1] == num) {
            return Some("clause");
        }
        if para_ref_re().captures_iter(src_plain).any(|c| &c[1] == num) {
            return Some("paragraph");
        }
        if schedule_ref_re().captures_iter(src_plain).any(|c| &c[1] == num) {
            return Some("schedule");
        }
        None
    };
    let zh_wrapper = |kind: &str, num: &str| -> String {
        match kind {
            "section" | "article" => format!("第{num}条"),
            "clause" => format!("第{num}款"),
            "paragraph" => format!("第{num}段"),
            "schedule" => format!("附表{num}"),
            _ => num.to_string(),
        }
    };
    let try_replace_generic_ref = |text: &str, wrapper: &str| -> String {
        for phrase in ["本条款", "本条", "该条款", "该条", "本节", "该节"] {
            if let Some(idx) = text.find(phrase) {
                return format!("{}{}{}", &text[..idx], wrapper, &text[idx + phrase.len()..]);
            }
        }
        text.to_string()
    };

    for (num, cnt) in missing.clone() {
        if cnt <= 0 || target_lang != "zh" {
            continue;
        }
        let Some(kind) = ref_kind_for_number(&num) else { continue };
        let insert_text = zh_wrapper(kind, &num);
        for _ in 0..cnt {
            let replaced = try_replace_generic_ref(&out, &insert_text);
            if replaced != out {
                out = replaced;
            }
        }
    }
    out
}

fn number_token_iter(text: &str) -> Vec<(usize, usize)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?").unwrap());
    re.find_iter(text)
        .filter(|m| {
            let before_digit = text[..m.start()].chars().next_back().is_some_and(|c| c.is_ascii_digit());
            let after_digit = text[m.end()..].chars().next().is_some_and(|c| c.is_ascii_digit());
            !before_digit && !after_digit
        })
        .map(|m| (m.start(), m.end()))
        .collect()
}

fn number_token_strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for (s, e) in number_token_iter(text) {
        out.push_str(&text[pos..s]);
        pos = e;
    }
    out.push_str(&text[pos..]);
    out
}

fn fix_reference_placeholders(tu: &TranslationUnit, translated: &str, target_lang: &str) -> (String, bool) {
    if translated.is_empty() || !target_lang.to_lowercase().starts_with("zh") {
        return (translated.to_string(), false);
    }
    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();
    let mut required_numbers: Vec<String> = Vec::new();
    for (s, e) in number_token_iter(&src_plain) {
        let tok = src_plain[s..e].to_string();
        if !required_numbers.contains(&tok) {
            required_numbers.push(tok);
        }
    }
    if required_numbers.is_empty() {
        return (translated.to_string(), false);
    }
    let uniq = if required_numbers.len() == 1 {
        Some(required_numbers[0].clone())
    } else {
        None
    };
    let Some(uniq) = uniq else {
        return (translated.to_string(), false);
    };

    let mut changed = false;
    let mut out = String::with_capacity(translated.len());
    for part in split_by_sentinels(translated) {
        if is_sentinel_part(&part) {
            out.push_str(&part);
            continue;
        }
        let mut cur = part.clone();
        let cur2 = zh_bad_ref_placeholder_re()
            .replace_all(&cur, |c: &regex::Captures| format!("第{uniq}{}", &c[1]))
            .into_owned();
        let cur3 = zh_bad_ref_missing_id_re()
            .replace_all(&cur2, |c: &regex::Captures| format!("第{uniq}{}", &c[1]))
            .into_owned();
        if cur3 != cur {
            changed = true;
            cur = cur3;
        }
        out.push_str(&cur);
    }
    (out, changed)
}

/// Checks control tokens, NT placeholders, and number multisets between a
/// TU's frozen surface and a candidate translation. Returns the first
/// violation found; callers treat any error as "send to repair", never as
/// a silent pass-through.
pub fn validate_sentinels(tu: &TranslationUnit, translated: &str) -> Result<(), ProtocolViolation> {
    if translated.contains('\r') || translated.contains('\n') {
        return Err(ProtocolViolation(format!(
            "raw newline characters found in TU {}",
            tu.tu_id
        )));
    }
    if translated.contains('\t') {
        return Err(ProtocolViolation(format!("raw tab characters found in TU {}", tu.tu_id)));
    }
    if control_tokens_from_text(&tu.frozen_surface) != control_tokens_from_text(translated) {
        return Err(ProtocolViolation(format!("control tokens mismatch for TU {}", tu.tu_id)));
    }

    let numeric_nt: HashSet<&str> = tu
        .nt_map
        .iter()
        .filter(|(_, original)| is_number_value(original))
        .map(|(tok, _)| tok.as_str())
        .collect();
    let expected_nt: HashSet<&str> = tu
        .nt_map
        .keys()
        .map(|s| s.as_str())
        .filter(|tok| !numeric_nt.contains(tok))
        .collect();
    let found_nt_tokens: HashSet<String> = nt_token_re()
        .find_iter(translated)
        .map(|m| m.as_str().to_string())
        .collect();
    let found_nt_non_numeric: HashSet<&str> = found_nt_tokens
        .iter()
        .map(|s| s.as_str())
        .filter(|tok| !numeric_nt.contains(tok))
        .collect();
    if expected_nt != found_nt_non_numeric {
        let missing = expected_nt.difference(&found_nt_non_numeric).count();
        let extra = found_nt_non_numeric.difference(&expected_nt).count();
        return Err(ProtocolViolation(format!(
            "NT placeholders mismatch for TU {} (missing={missing}, extra={extra})",
            tu.tu_id
        )));
    }

    for token in &expected_nt {
        if translated.matches(token).count() != 1 {
            return Err(ProtocolViolation(format!("NT placeholder count != 1 for TU {}", tu.tu_id)));
        }
    }

    for m in any_sentinel().find_iter(translated) {
        let token = m.as_str();
        if CONTROL_TOKENS.contains(&token) {
            continue;
        }
        if nt_token_re().find(token).map(|mm| mm.as_str() == token).unwrap_or(false) {
            continue;
        }
        return Err(ProtocolViolation(format!("unexpected sentinel token in TU {}", tu.tu_id)));
    }

    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();
    let tgt_unfrozen = unfreeze_text(translated, &tu.nt_map);
    let tgt_plain = any_sentinel().replace_all(&tgt_unfrozen, " ").into_owned();
    if number_tokens_in_text(&src_plain) != number_tokens_in_text(&tgt_plain) {
        return Err(ProtocolViolation(format!("number tokens mismatch for TU {}", tu.tu_id)));
    }

    Ok(())
}

fn repair_raw_controls_to_match_source(tu: &TranslationUnit, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let expected = control_tokens_from_text(&tu.frozen_surface);
    let current = control_tokens_from_text(text);
    let count = |v: &[&str], tok: &str| v.iter().filter(|&&t| t == tok).count() as i64;
    let mut need_br = (count(&expected, BR) - count(&current, BR)).max(0);
    let mut need_tab = (count(&expected, TAB) - count(&current, TAB)).max(0);

    if !text.contains('\r') && !text.contains('\n') && !text.contains('\t') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if need_br > 0 {
                    out.push_str(BR);
                    need_br -= 1;
                } else {
                    out.push(' ');
                }
            }
            '\n' => {
                if need_br > 0 {
                    out.push_str(BR);
                    need_br -= 1;
                } else {
                    out.push(' ');
                }
            }
            '\t' => {
                if need_tab > 0 {
                    out.push_str(TAB);
                    need_tab -= 1;
                } else {
                    out.push(' ');
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn strip_prompt_artifacts_if_unexpected(tu: &TranslationUnit, translated: &str) -> String {
    if translated.is_empty() {
        return String::new();
    }
    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ").into_owned();
    let out_plain = any_sentinel().replace_all(translated, " ").into_owned();
    let leaked = prompt_tag_re().is_match(&out_plain) || prompt_kv_re().is_match(&out_plain);
    let src_clean = !prompt_tag_re().is_match(&src_plain) && !prompt_kv_re().is_match(&src_plain);
    if leaked && src_clean {
        let cur = prompt_tag_re().replace_all(translated, " ").into_owned();
        let cur = prompt_kv_re().replace_all(&cur, " ").into_owned();
        let cur = Regex::new(r"\s{2,}").unwrap().replace_all(&cur, " ").into_owned();
        cur.trim().to_string()
    } else {
        translated.to_string()
    }
}

/// Runs the full deterministic repair ladder on a raw model response.
/// Returns the normalized candidate plus any whitespace-policy flags worth
/// surfacing to quality evaluation (never fatal on their own).
pub fn normalize_candidate_translation(
    tu: &TranslationUnit,
    raw: &str,
    target_lang: &str,
) -> (String, Vec<String>) {
    let mut out = normalize_model_output(raw);
    out = repair_raw_controls_to_match_source(tu, &out);
    out = strip_prompt_artifacts_if_unexpected(tu, &out);

    if !tu.nt_map.is_empty() {
        for (tok, original) in &tu.nt_map {
            if tok.is_empty() || out.contains(tok.as_str()) || original.is_empty() {
                continue;
            }
            if out.contains(original.as_str()) {
                out = out.replacen(original.as_str(), tok, 1);
            }
        }
    }

    let allowed: HashSet<&str> = any_sentinel().find_iter(&tu.frozen_surface).map(|m| m.as_str()).collect();
    out = strip_unexpected_sentinels(&out, &allowed);

    out = sanitize_number_tokens_to_match_source(tu, &out, target_lang);
    let (r1, _ref_changed) = fix_reference_placeholders(tu, &out, target_lang);
    out = r1;
    let (r2, _script_changed) = strip_unexpected_scripts_for_tu(tu, &out, target_lang);
    out = r2;

    out = normalize_sentinel_edge_whitespace_to_source(tu, &out);
    let (r3, ws_flags, _) = normalize_inner_whitespace_for_lang(tu, &out, target_lang);
    out = normalize_sentinel_edge_whitespace_to_source(tu, &r3);
    (out, ws_flags)
}

/// Builds a `- source -> target` glossary hint block for a prompt, limited
/// to terms that actually occur in `text` (by substring for CJK keys, by
/// case-insensitive word match for Latin ones), longest keys first to
/// avoid partial shadowing.
pub fn glossary_lines_for_text(glossary: Option<&HashMap<String, String>>, text: &str, max_items: usize) -> String {
    let Some(glossary) = glossary else { return String::new() };
    if text.is_empty() || max_items == 0 {
        return String::new();
    }
    let src_plain = any_sentinel().replace_all(text, " ").into_owned();
    let mut items: Vec<(&String, &String)> = glossary.iter().collect();
    items.sort_by_key(|(k, _)| std::cmp::Reverse(k.len()));

    let latin_re = Regex::new(r"[A-Za-z]").unwrap();
    let mut matched = Vec::new();
    for (k, v) in items {
        let ks = k.trim();
        let vs = v.trim();
        if ks.is_empty() || vs.is_empty() {
            continue;
        }
        let hit = if latin_re.is_match(ks) {
            Regex::new(&format!("(?i){}", regex::escape(ks))).unwrap().is_match(&src_plain)
        } else {
            src_plain.contains(ks)
        };
        if !hit {
            continue;
        }
        matched.push(format!("- {ks} -> {vs}"));
        if matched.len() >= max_items {
            break;
        }
    }
    matched.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tu(source: &str, frozen: &str, nt_map: HashMap<String, String>) -> TranslationUnit {
        TranslationUnit::new(1, "word/document.xml".into(), "x#w:p@0".into(), vec![], vec![], source.into(), frozen.into(), nt_map)
    }

    #[test]
    fn normalizes_weird_whitespace_and_trims() {
        assert_eq!(normalize_model_output("  a\u{00A0}b  "), "a b");
    }

    #[test]
    fn strips_inner_space_only_between_cjk_chars() {
        assert_eq!(strip_cjk_inner_space("甲 乙"), "甲乙");
        assert_eq!(strip_cjk_inner_space("a 乙"), "a 乙");
    }

    #[test]
    fn repairs_raw_newline_to_br_sentinel() {
        let t = tu("a\nb", &format!("a{BR}b"), HashMap::new());
        let repaired = repair_raw_controls_to_match_source(&t, "a\nb");
        assert_eq!(repaired, format!("a{BR}b"));
    }

    #[test]
    fn validate_sentinels_accepts_matching_nt_tokens() {
        let mut nt_map = HashMap::new();
        nt_map.insert(nt_token(1), "https://x.io".to_string());
        let t = tu(&format!("see {}", nt_token(1)), &format!("see {}", nt_token(1)), nt_map);
        assert!(validate_sentinels(&t, &format!("参见 {}", nt_token(1))).is_ok());
    }

    #[test]
    fn validate_sentinels_rejects_missing_nt_token() {
        let mut nt_map = HashMap::new();
        nt_map.insert(nt_token(1), "https://x.io".to_string());
        let t = tu(&format!("see {}", nt_token(1)), &format!("see {}", nt_token(1)), nt_map);
        assert!(validate_sentinels(&t, "参见 the link").is_err());
    }

    #[test]
    fn validate_sentinels_rejects_number_mismatch() {
        let t = tu("clause 7 applies", "clause 7 applies", HashMap::new());
        assert!(validate_sentinels(&t, "条款适用").is_err());
        assert!(validate_sentinels(&t, "第7条适用").is_ok());
    }

    #[test]
    fn int_to_zh_numeral_handles_teens_and_hundreds() {
        assert_eq!(int_to_zh_numeral(7), "七");
        assert_eq!(int_to_zh_numeral(10), "十");
        assert_eq!(int_to_zh_numeral(12), "十二");
        assert_eq!(int_to_zh_numeral(100), "一百");
    }

    #[test]
    fn glossary_lines_only_include_occurring_terms() {
        let mut g = HashMap::new();
        g.insert("indemnify".to_string(), "赔偿".to_string());
        g.insert("force majeure".to_string(), "不可抗力".to_string());
        let lines = glossary_lines_for_text(Some(&g), "the party shall indemnify the other", 5);
        assert_eq!(lines, "- indemnify -> 赔偿");
    }
}
