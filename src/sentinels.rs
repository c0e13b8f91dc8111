//! Sentinel token grammar: control tokens, numbered non-translatable
//! placeholders, and reserved segmentation markers.
//!
//! All tokens are ASCII-enclosed in `<<MT_...>>` and are atomic: they never
//! occur nested, and are never produced by splitting a partial match. Models
//! sometimes echo alternate bracketings (fullwidth `【…】`, CJK corner
//! brackets `《…》`, or a doubled-bracket `[[…]]`); [`decode_from_model`]
//! normalizes those back to canonical form before anything else touches the
//! text.

use regex::Regex;
use std::sync::OnceLock;

pub const TAB: &str = "<<MT_TAB>>";
pub const BR: &str = "<<MT_BR>>";
pub const NBH: &str = "<<MT_NBH>>";
pub const SHY: &str = "<<MT_SHY>>";

pub const CONTROL_TOKENS: [&str; 4] = [TAB, BR, NBH, SHY];

const NT_ID_WIDTH: usize = 4;
const SEG_ID_WIDTH: usize = 6;

/// Builds the canonical `<<MT_NT:dddd>>` token for a 1-based placeholder id.
pub fn nt_token(id: u32) -> String {
    format!("<<MT_NT:{id:0width$}>>", width = NT_ID_WIDTH)
}

/// Builds the canonical `<<MT_SEG:dddddd>>` segmentation-start marker.
pub fn seg_start(id: u32) -> String {
    format!("<<MT_SEG:{id:0width$}>>", width = SEG_ID_WIDTH)
}

/// Builds the canonical `<<MT_END:dddddd>>` segmentation-end marker.
pub fn seg_end(id: u32) -> String {
    format!("<<MT_END:{id:0width$}>>", width = SEG_ID_WIDTH)
}

fn any_sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<<MT_(?:TAB|BR|NBH|SHY|NT:\d{4}|SEG:\d{6}|END:\d{6})>>").unwrap()
    })
}

/// Matches any canonical sentinel token.
pub fn any_sentinel() -> &'static Regex {
    any_sentinel_re()
}

fn nt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<<MT_NT:(\d{4})>>").unwrap())
}

/// Matches a single NT token, capturing its numeric id.
pub fn nt_token_re() -> &'static Regex {
    nt_re()
}

fn alt_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:\[\[|\x{3010}|\x{300a})\s*([A-Za-z]{2,4}(?::\d{1,6})?)\s*(?:\]\]|\x{3011}|\x{300b})",
        )
        .unwrap()
    })
}

fn normalize_sentinel_content(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if matches!(raw, "TAB" | "BR" | "NBH" | "SHY") {
        return Some(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("NT:") {
        if rest.len() <= NT_ID_WIDTH && rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty()
        {
            let n: u32 = rest.parse().ok()?;
            return Some(format!("NT:{n:0width$}", width = NT_ID_WIDTH));
        }
        return None;
    }
    for (prefix, label) in [("SEG:", "SEG"), ("END:", "END")] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            if rest.len() <= SEG_ID_WIDTH
                && rest.chars().all(|c| c.is_ascii_digit())
                && !rest.is_empty()
            {
                let n: u32 = rest.parse().ok()?;
                return Some(format!("{label}:{n:0width$}", width = SEG_ID_WIDTH));
            }
            return None;
        }
    }
    None
}

/// Normalizes alternate sentinel bracketings a model may emit (e.g.
/// `[[TAB]]`, `【NT:0001】`) back to the canonical `<<MT_…>>` form. Runs that
/// do not look like a sentinel are passed through verbatim.
pub fn decode_from_model(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    alt_bracket_re()
        .replace_all(text, |caps: &regex::Captures| {
            match normalize_sentinel_content(&caps[1]) {
                Some(norm) => format!("<<MT_{norm}>>"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn control_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pat = CONTROL_TOKENS
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&pat).unwrap()
    })
}

/// Extracts the ordered subsequence of control tokens (`TAB`/`BR`/`NBH`/`SHY`)
/// present in `text`.
pub fn control_tokens_from_text(text: &str) -> Vec<&'static str> {
    if text.is_empty() {
        return Vec::new();
    }
    control_token_re()
        .find_iter(text)
        .map(|m| {
            CONTROL_TOKENS
                .iter()
                .copied()
                .find(|&t| t == m.as_str())
                .expect("match came from alternation of CONTROL_TOKENS")
        })
        .collect()
}

/// Result of [`parse_segmented`]: text recovered per segment id.
#[derive(Debug, Clone, Default)]
pub struct ParsedSegments {
    pub by_id: std::collections::BTreeMap<u32, String>,
}

fn find_marker(text: &str, marker: &str, seg_id: u32, cursor: usize) -> Option<(usize, usize)> {
    let exact = format!("<<MT_{marker}:{seg_id:0width$}>>", width = SEG_ID_WIDTH);
    if let Some(rel) = text.get(cursor..).and_then(|s| s.find(&exact)) {
        let start = cursor + rel;
        return Some((start, start + exact.len()));
    }
    // Tolerant fallback: whitespace around the id, loose zero-padding.
    let pat = Regex::new(&format!(r"<<MT_{marker}:\s*0*{seg_id}\s*>>")).ok()?;
    let hay = text.get(cursor..)?;
    let m = pat.find(hay)?;
    Some((cursor + m.start(), cursor + m.end()))
}

/// Parses a stitched multi-segment model response using `SEG`/`END` markers.
/// Tolerant of whitespace inside marker ids. Fails if a marker for an
/// expected id is missing or markers are out of order.
pub fn parse_segmented(text: &str, expected_ids: &[u32]) -> Result<ParsedSegments, String> {
    let mut segments = std::collections::BTreeMap::new();
    let mut cursor = 0usize;
    for &seg_id in expected_ids {
        let (start_idx, start_end) = find_marker(text, "SEG", seg_id, cursor)
            .ok_or_else(|| format!("missing SEG start for id={seg_id}"))?;
        let (end_idx, end_end) = find_marker(text, "END", seg_id, start_end)
            .ok_or_else(|| format!("missing SEG end for id={seg_id}"))?;
        let _ = start_idx;
        segments.insert(seg_id, text[start_end..end_idx].to_string());
        cursor = end_end;
    }
    let got: std::collections::BTreeSet<_> = segments.keys().copied().collect();
    let want: std::collections::BTreeSet<_> = expected_ids.iter().copied().collect();
    if got != want {
        return Err("SEG id mismatch".to_string());
    }
    Ok(ParsedSegments { by_id: segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nt_token_is_zero_padded() {
        assert_eq!(nt_token(1), "<<MT_NT:0001>>");
        assert_eq!(nt_token(42), "<<MT_NT:0042>>");
    }

    #[test]
    fn decode_fullwidth_brackets() {
        assert_eq!(decode_from_model("\u{3010}NT:0001\u{3011}"), nt_token(1));
        assert_eq!(decode_from_model("[[TAB]]"), TAB);
    }

    #[test]
    fn decode_idempotent() {
        let s = "prefix [[NT:3]] 【TAB】 suffix";
        let once = decode_from_model(s);
        let twice = decode_from_model(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn decode_leaves_unknown_runs_verbatim() {
        assert_eq!(decode_from_model("[[WOMBAT]]"), "[[WOMBAT]]");
    }

    #[test]
    fn control_tokens_ordered_subsequence() {
        let text = format!("a{TAB}b{BR}c{TAB}");
        assert_eq!(control_tokens_from_text(&text), vec![TAB, BR, TAB]);
    }

    #[test]
    fn any_sentinel_matches_all_families() {
        let re = any_sentinel();
        assert!(re.is_match(TAB));
        assert!(re.is_match(&nt_token(7)));
        assert!(re.is_match(&seg_start(1)));
        assert!(re.is_match(&seg_end(1)));
        assert!(!re.is_match("plain text"));
    }

    #[test]
    fn parse_segmented_recovers_text() {
        let text = format!(
            "{}hello{}{}world{}",
            seg_start(1),
            seg_end(1),
            seg_start(2),
            seg_end(2)
        );
        let parsed = parse_segmented(&text, &[1, 2]).unwrap();
        assert_eq!(parsed.by_id[&1], "hello");
        assert_eq!(parsed.by_id[&2], "world");
    }

    #[test]
    fn parse_segmented_missing_marker_errors() {
        let text = seg_start(1);
        assert!(parse_segmented(&text, &[1]).is_err());
    }
}
