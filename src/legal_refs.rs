//! Deterministic bilingual mapping of frozen legal references.
//!
//! `freezer` locks references like "Section 2(c)" or "第7条" into NT
//! placeholders so the model never touches them. Once the target language
//! is known, this module rewrites the *placeholder's restoration text* (not
//! anything the model sees) from the source convention to the target one,
//! so an EN->ZH document ends up with "第2(c)款", not an untranslated
//! English cross-reference sitting inside Chinese prose.

use crate::ir::TranslationUnit;
use regex::Regex;
use std::sync::OnceLock;

fn id_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?)((?:\([A-Za-z0-9]+\))*)$").unwrap()
    })
}

fn en_legal_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?P<kind>Section|Article|Clause|Paragraph|Schedule)s?\s+(?P<id>\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?(?:\([A-Za-z0-9]+\))*|[IVXLCDM]{1,8})\b",
        )
        .unwrap()
    })
}

fn en_legal_ref_abbr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?P<kind>Sec|Art|Cl|Para|Sch)s?\.\s+(?P<id>\d+(?:[.,]\d+)*(?:-\d+(?:[.,]\d+)*)?(?:\([A-Za-z0-9]+\))*|[IVXLCDM]{1,8})\b",
        )
        .unwrap()
    })
}

fn zh_legal_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"第\s*(?P<id>\d+(?:\([A-Za-z0-9]+\))*)\s*(?P<kind>条|款|节|段|章|篇)(?P<post>(?:\([A-Za-z0-9]+\))*)").unwrap()
    })
}

fn zh_schedule_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"附表\s*(?P<id>\d+(?:\([A-Za-z0-9]+\))*)").unwrap())
}

fn zh_ref(label: &str, ref_id: &str) -> String {
    if let Some(caps) = id_split_re().captures(ref_id) {
        let num = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
        let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
        if !suffix.is_empty() {
            return format!("第{num}{label}{suffix}");
        }
    }
    format!("第{ref_id}{label}")
}

/// Rewrites one frozen reference's restoration text for the given language
/// pair. Returns `None` when `original` doesn't look like a legal reference
/// in the source convention, or the pair isn't en<->zh.
pub fn map_legal_reference_text(original: &str, source_lang: &str, target_lang: &str) -> Option<String> {
    if original.is_empty() {
        return None;
    }
    let src = source_lang.to_lowercase();
    let tgt = target_lang.to_lowercase();

    if src.starts_with("en") && tgt.starts_with("zh") {
        let caps = en_legal_ref_re()
            .captures(original)
            .or_else(|| en_legal_ref_abbr_re().captures(original))?;
        let kind = caps
            .name("kind")?
            .as_str()
            .to_lowercase()
            .trim_end_matches('.')
            .trim_end_matches('s')
            .to_string();
        let ref_id = caps.name("id")?.as_str().trim();
        if ref_id.is_empty() {
            return None;
        }
        return match kind.as_str() {
            "section" | "article" | "sec" | "art" => Some(zh_ref("条", ref_id)),
            "clause" | "cl" => Some(zh_ref("款", ref_id)),
            "paragraph" | "para" => Some(zh_ref("段", ref_id)),
            "schedule" | "sch" => Some(format!("附表{ref_id}")),
            _ => None,
        };
    }

    if src.starts_with("zh") && tgt.starts_with("en") {
        if let Some(caps) = zh_legal_ref_re().captures(original) {
            let ref_id = format!(
                "{}{}",
                caps.name("id").map(|m| m.as_str()).unwrap_or(""),
                caps.name("post").map(|m| m.as_str()).unwrap_or(""),
            );
            let ref_id = ref_id.trim();
            let kind = caps.name("kind")?.as_str();
            if ref_id.is_empty() {
                return None;
            }
            return match kind {
                "条" | "节" | "章" | "篇" => Some(format!("Section {ref_id}")),
                "款" => Some(format!("Clause {ref_id}")),
                "段" => Some(format!("Paragraph {ref_id}")),
                _ => None,
            };
        }
        if let Some(caps) = zh_schedule_ref_re().captures(original) {
            let ref_id = caps.name("id")?.as_str().trim();
            if ref_id.is_empty() {
                return None;
            }
            return Some(format!("Schedule {ref_id}"));
        }
        return None;
    }

    None
}

/// Rewrites every TU's NT restoration map in place once the language pair
/// is known. Returns the number of placeholders changed.
pub fn rewrite_nt_maps_for_target_lang(
    tus: &mut [TranslationUnit],
    source_lang: &str,
    target_lang: &str,
) -> usize {
    let mut changed = 0;
    for tu in tus.iter_mut() {
        if tu.nt_map.is_empty() {
            continue;
        }
        for original in tu.nt_map.values_mut() {
            if let Some(mapped) = map_legal_reference_text(original, source_lang, target_lang) {
                if &mapped != original {
                    *original = mapped;
                    changed += 1;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_en_section_to_zh() {
        assert_eq!(
            map_legal_reference_text("Section 2(c)", "en", "zh").as_deref(),
            Some("第2(c)条")
        );
    }

    #[test]
    fn maps_en_schedule_abbr_to_zh() {
        assert_eq!(
            map_legal_reference_text("Sch. 3", "en", "zh").as_deref(),
            Some("附表3")
        );
    }

    #[test]
    fn maps_zh_article_to_en() {
        assert_eq!(
            map_legal_reference_text("第7条", "zh", "en").as_deref(),
            Some("Section 7")
        );
    }

    #[test]
    fn maps_zh_schedule_to_en() {
        assert_eq!(
            map_legal_reference_text("附表2", "zh", "en").as_deref(),
            Some("Schedule 2")
        );
    }

    #[test]
    fn non_legal_text_maps_to_none() {
        assert_eq!(map_legal_reference_text("hello world", "en", "zh"), None);
    }

    #[test]
    fn same_direction_pair_is_noop() {
        assert_eq!(map_legal_reference_text("Section 7", "en", "en"), None);
    }
}
