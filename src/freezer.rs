//! Freezing: tokenizing substrings that must survive translation untouched
//! into `<<MT_NT:dddd>>` placeholders, and restoring them afterward.
//!
//! Frozen categories: trademark tokens, runs in a third script, URLs,
//! emails, Windows paths, `{...}`/`${...}` template placeholders, `%N`
//! slots, English and Chinese legal references, bracketed enumerations,
//! dot/underscore/dash leaders, and standalone `X`/`Y`/`Z` party variables.

use crate::sentinels::{any_sentinel, nt_token};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::OnceLock;

const TRADEMARK_TOKEN: &str = r"[A-Za-z0-9]{2,24}[®™℠]";
const OTHER_SCRIPT_RUN: &str = r"[\u{0900}-\u{097F}\u{0980}-\u{09FF}\u{0600}-\u{06FF}\u{0400}-\u{04FF}\u{0370}-\u{03FF}\u{0590}-\u{05FF}\u{0E00}-\u{0E7F}\u{AC00}-\u{D7AF}\u{3040}-\u{309F}\u{30A0}-\u{30FF}]+";
const URL: &str = r"https?://[^\s<>()]+";
const EMAIL: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";
const WIN_PATH: &str = r#"[A-Za-z]:\\(?:[^\\/:*?"<>|\r\n]+\\)*[^\\/:*?"<>|\r\n]*"#;
const PLACEHOLDER: &str = r"(?:\{[^{}\r\n]{1,100}\}|\$\{[^{}\r\n]{1,100}\})";
const PERCENT_SLOT: &str = r"%\d+";
const EN_LEGAL_REF: &str = r"\b(?:Section|Article|Clause|Paragraph|Schedule)s?\s+(?:\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?(?:\([A-Za-z0-9]+\))*|[IVXLCDM]{1,8})\b";
const EN_LEGAL_REF_ABBR: &str = r"\b(?:Sec|Art|Cl|Para|Sch)s?\.\s+(?:\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?(?:\([A-Za-z0-9]+\))*|[IVXLCDM]{1,8})\b";
const ZH_LEGAL_REF: &str = r"第\s*\d+(?:\([A-Za-z0-9]+\))*\s*(?:条|款|项|段|章|节)";
const ZH_SCHEDULE_REF: &str = r"(?:附表|附件)\s*\d+(?:\([A-Za-z0-9]+\))*";
const CLAUSE_REF: &str = r"\b\d+(?:\([A-Za-z0-9]+\))+";
const ENUM_NUM: &str = r"\(\d{1,3}\)";
const ENUM_ROMAN: &str = r"\((?:[ivxlcdmIVXLCDM]{1,6})\)";
const ENUM_ALPHA: &str = r"\([A-Za-z]\)";
const DOT_LEADER: &str = r"[.\u{2026}]{8,}";
const UNDERSCORE_LEADER: &str = r"_{5,}";
const DASH_LEADER: &str = r"[\-\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2015}\u{2212}]{5,}";
const VAR_MARKER: &str = r"\b[XYZ]\b";

fn freeze_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = [
            TRADEMARK_TOKEN,
            OTHER_SCRIPT_RUN,
            URL,
            EMAIL,
            WIN_PATH,
            PLACEHOLDER,
            PERCENT_SLOT,
            EN_LEGAL_REF,
            EN_LEGAL_REF_ABBR,
            ZH_LEGAL_REF,
            ZH_SCHEDULE_REF,
            CLAUSE_REF,
            ENUM_NUM,
            ENUM_ROMAN,
            ENUM_ALPHA,
            DOT_LEADER,
            UNDERSCORE_LEADER,
            DASH_LEADER,
            VAR_MARKER,
        ]
        .join("|");
        // The whole grammar is case-insensitive (matching the reference
        // implementation's `FREEZE_RE` flags), not just the legal-reference
        // alternations, so e.g. an uppercase `HTTP://` URL still freezes.
        RegexBuilder::new(&format!("(?:{pattern})"))
            .case_insensitive(true)
            .build()
            .expect("freeze grammar is a fixed, tested pattern")
    })
}

/// Result of freezing one TU's frozen surface: the token-substituted text
/// plus the map needed to restore it later.
#[derive(Debug, Clone, Default)]
pub struct FreezeResult {
    pub text: String,
    pub nt_map: HashMap<String, String>,
}

/// Replaces every non-translatable substring in `text` with a numbered
/// `<<MT_NT:dddd>>` token, skipping ranges already occupied by an existing
/// sentinel (so re-freezing a partially-protected surface is idempotent on
/// those ranges).
pub fn freeze_text(text: &str) -> FreezeResult {
    let mut nt_map = HashMap::new();
    let mut next_id = 1u32;

    let mut add_token = |original: &str, nt_map: &mut HashMap<String, String>| -> String {
        let token = nt_token(next_id);
        next_id += 1;
        nt_map.insert(token.clone(), original.to_string());
        token
    };

    let mut freeze_plain = |plain: &str, nt_map: &mut HashMap<String, String>| -> String {
        let mut out = String::with_capacity(plain.len());
        let mut last = 0;
        for m in freeze_re().find_iter(plain) {
            out.push_str(&plain[last..m.start()]);
            out.push_str(&add_token(m.as_str(), nt_map));
            last = m.end();
        }
        out.push_str(&plain[last..]);
        out
    };

    let mut pieces = String::with_capacity(text.len());
    let mut pos = 0;
    for m in any_sentinel().find_iter(text) {
        pieces.push_str(&freeze_plain(&text[pos..m.start()], &mut nt_map));
        pieces.push_str(m.as_str());
        pos = m.end();
    }
    pieces.push_str(&freeze_plain(&text[pos..], &mut nt_map));

    FreezeResult { text: pieces, nt_map }
}

/// Restores frozen substrings from their `<<MT_NT:dddd>>` tokens. Tokens
/// absent from `nt_map` (already consumed, or foreign to this TU) are left
/// untouched rather than silently dropped.
pub fn unfreeze_text(text: &str, nt_map: &HashMap<String, String>) -> String {
    if nt_map.is_empty() {
        return text.to_string();
    }
    crate::sentinels::nt_token_re()
        .replace_all(text, |caps: &regex::Captures| {
            let token = &caps[0];
            nt_map.get(token).cloned().unwrap_or_else(|| token.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezes_url_and_email() {
        let r = freeze_text("see https://example.com/x or a@b.com for details");
        assert_eq!(r.nt_map.len(), 2);
        assert!(r.text.contains("<<MT_NT:0001>>"));
        assert!(r.text.contains("<<MT_NT:0002>>"));
    }

    #[test]
    fn freezes_en_legal_reference_as_one_unit() {
        let r = freeze_text("as set out in Section 2(c)(i) hereof");
        assert_eq!(r.nt_map.len(), 1);
        assert_eq!(r.nt_map.get("<<MT_NT:0001>>").unwrap(), "Section 2(c)(i)");
    }

    #[test]
    fn freezes_zh_legal_reference() {
        let r = freeze_text("根据第7条规定");
        assert_eq!(r.nt_map.len(), 1);
        assert_eq!(r.nt_map.get("<<MT_NT:0001>>").unwrap(), "第7条");
    }

    #[test]
    fn freezes_party_variable_not_surrounding_word() {
        let r = freeze_text("party X shall indemnify party Example");
        assert_eq!(r.nt_map.len(), 1);
        assert_eq!(r.nt_map.get("<<MT_NT:0001>>").unwrap(), "X");
    }

    #[test]
    fn round_trips_through_unfreeze() {
        let original = "visit https://a.b/c and see Section 4(a)";
        let frozen = freeze_text(original);
        let restored = unfreeze_text(&frozen.text, &frozen.nt_map);
        assert_eq!(restored, original);
    }

    #[test]
    fn skips_text_already_covered_by_a_sentinel() {
        let r = freeze_text(&format!("before {} after https://x.io", crate::sentinels::TAB));
        assert_eq!(r.nt_map.len(), 1);
        assert!(r.text.contains(crate::sentinels::TAB));
    }
}
