//! Projector (§4.12): reallocates a translated surface back onto the format
//! spans, then onto the individual text nodes, that the source surface was
//! built from.
//!
//! The core trick is the largest-remainder method: split the translated text
//! into "plain units" (characters, with each sentinel token counted as one
//! atomic unit), then divide those units among spans/nodes in proportion to
//! how much source text each one held.

use crate::error::DocError;
use crate::freezer::unfreeze_text;
use crate::ir::{FormatSpan, TextNodeRef};
use crate::sentinels::{any_sentinel, control_tokens_from_text, CONTROL_TOKENS};
use std::collections::HashMap;

/// One span's slice of a translated surface, ready to redistribute across
/// its node refs.
#[derive(Debug, Clone)]
pub struct SpanSlice {
    pub span: FormatSpan,
    pub text: String,
}

fn split_by_control_sequence(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut parts = Vec::new();
    let mut pos = 0usize;
    for tok in find_control_token_matches(text) {
        parts.push(text[pos..tok.0].to_string());
        parts.push(text[tok.0..tok.1].to_string());
        pos = tok.1;
    }
    parts.push(text[pos..].to_string());
    parts
}

fn find_control_token_matches(text: &str) -> Vec<(usize, usize)> {
    let mut matches: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;
    while i < text.len() {
        let mut matched = false;
        for tok in CONTROL_TOKENS {
            if text[i..].starts_with(tok) {
                matches.push((i, i + tok.len()));
                i += tok.len();
                matched = true;
                break;
            }
        }
        if !matched {
            i += text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        }
    }
    matches
}

/// Splits `text` into units: one unit per plain character, one unit per
/// whole sentinel token (so a `<<MT_NT:0001>>` counts as a single unit, not
/// 14 characters).
fn unitize(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut pos = 0usize;
    for m in any_sentinel().find_iter(text) {
        if m.start() > pos {
            units.extend(text[pos..m.start()].chars().map(|c| c.to_string()));
        }
        units.push(m.as_str().to_string());
        pos = m.end();
    }
    if pos < text.len() {
        units.extend(text[pos..].chars().map(|c| c.to_string()));
    }
    units
}

fn is_sentinel_unit(unit: &str) -> bool {
    any_sentinel().find(unit).map(|m| m.start() == 0 && m.end() == unit.len()).unwrap_or(false)
}

fn count_plain_units(units: &[String]) -> usize {
    units.iter().filter(|u| !is_sentinel_unit(u)).count()
}

/// Largest-remainder allocation of `total` indivisible units across
/// `weights`-proportional buckets. Every unit is assigned; rounding
/// remainders go to the buckets with the largest fractional share first.
fn allocate_plain_counts(total: usize, weights: &[usize]) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    if total == 0 {
        return vec![0; weights.len()];
    }

    let total_w: usize = weights.iter().sum();
    if total_w == 0 {
        let base = total / weights.len();
        let mut out = vec![base; weights.len()];
        let assigned: usize = out.iter().sum();
        if let Some(last) = out.last_mut() {
            *last += total - assigned;
        }
        return out;
    }

    let raw: Vec<f64> = weights.iter().map(|&w| total as f64 * w as f64 / total_w as f64).collect();
    let mut floored: Vec<usize> = raw.iter().map(|x| x.floor() as usize).collect();
    let assigned: usize = floored.iter().sum();
    let remain = total.saturating_sub(assigned);

    let mut frac: Vec<(f64, usize)> = raw
        .iter()
        .zip(floored.iter())
        .enumerate()
        .map(|(i, (r, f))| (r - *f as f64, i))
        .collect();
    frac.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));

    for k in 0..remain {
        let (_, idx) = frac[k % frac.len()];
        floored[idx] += 1;
    }
    floored
}

/// Projects a whole translated surface back onto its source's format spans.
///
/// Errors when the translated surface's control-token sequence, part count,
/// or span coverage disagrees with the source surface — these indicate a
/// translation that survived normalization but still isn't structurally
/// compatible with the original.
pub fn project_translation_to_spans(
    spans: &[FormatSpan],
    source_surface: &str,
    target_surface: &str,
    nt_map: &HashMap<String, String>,
) -> Result<Vec<SpanSlice>, DocError> {
    let protocol_err = |detail: &str| DocError::Protocol {
        tu_id: 0,
        detail: detail.to_string(),
    };

    if control_tokens_from_text(source_surface) != control_tokens_from_text(target_surface) {
        return Err(protocol_err("control token sequence mismatch"));
    }

    let source_parts = split_by_control_sequence(source_surface);
    let target_parts = split_by_control_sequence(target_surface);
    if source_parts.len() != target_parts.len() {
        return Err(protocol_err("control token part count mismatch"));
    }

    let mut span_slices = Vec::new();
    let mut span_idx = 0usize;

    for (src_part, tgt_part) in source_parts.iter().zip(target_parts.iter()) {
        if CONTROL_TOKENS.contains(&src_part.as_str()) {
            if tgt_part != src_part {
                return Err(protocol_err("control token mismatch"));
            }
            continue;
        }

        let src_part_chars = src_part.chars().count();
        let mut block_spans: Vec<&FormatSpan> = Vec::new();
        let mut block_src_len = 0usize;
        while span_idx < spans.len() && block_src_len < src_part_chars {
            let span = &spans[span_idx];
            block_spans.push(span);
            block_src_len += span.source_text.chars().count();
            span_idx += 1;
        }

        if block_spans.is_empty() {
            if !tgt_part.trim().is_empty() {
                return Err(protocol_err("translated text exists for empty source block"));
            }
            continue;
        }

        let tgt_units = unitize(tgt_part);
        let total_plain = count_plain_units(&tgt_units);
        let weights: Vec<usize> = block_spans.iter().map(|s| s.source_text.chars().count().max(1)).collect();
        let desired = allocate_plain_counts(total_plain, &weights);

        let mut slices_units: Vec<Vec<String>> = vec![Vec::new(); block_spans.len()];
        let mut current_span = 0usize;
        let mut current_plain = 0usize;

        for unit in tgt_units {
            let is_plain = !is_sentinel_unit(&unit);
            slices_units[current_span].push(unit);
            if is_plain {
                current_plain += 1;
            }
            if current_span < block_spans.len() - 1 && current_plain >= desired[current_span] {
                current_span += 1;
                current_plain = 0;
            }
        }

        for (span, units) in block_spans.iter().zip(slices_units.into_iter()) {
            let frozen = units.concat();
            let text = unfreeze_text(&frozen, nt_map);
            span_slices.push(SpanSlice {
                span: (*span).clone(),
                text,
            });
        }
    }

    if span_idx != spans.len() {
        let remaining = &spans[span_idx..];
        if remaining.iter().any(|s| !s.source_text.trim().is_empty()) {
            return Err(protocol_err("span coverage mismatch"));
        }
        for span in remaining {
            span_slices.push(SpanSlice {
                span: span.clone(),
                text: String::new(),
            });
        }
    }

    Ok(span_slices)
}

/// Distributes one span's projected text across its (possibly several)
/// backing text nodes, proportional to each node's original text length.
pub fn distribute_span_text_to_nodes(span: &FormatSpan, text: &str) -> Vec<(TextNodeRef, String)> {
    if span.node_refs.is_empty() {
        return Vec::new();
    }
    if span.node_refs.len() == 1 {
        return vec![(span.node_refs[0].clone(), text.to_string())];
    }

    let weights: Vec<usize> = span
        .node_refs
        .iter()
        .map(|n| n.original_text.chars().count().max(1))
        .collect();
    let units: Vec<char> = text.chars().collect();
    let total = units.len();
    let desired = allocate_plain_counts(total, &weights);

    let mut out = Vec::new();
    let mut idx = 0usize;
    for (node_ref, count) in span.node_refs.iter().zip(desired.iter()) {
        let end = (idx + count).min(units.len());
        let piece: String = units[idx..end].iter().collect();
        idx = end;
        out.push((node_ref.clone(), piece));
    }
    if idx < units.len() {
        let tail: String = units[idx..].iter().collect();
        if let Some(last) = out.last_mut() {
            last.1.push_str(&tail);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NodeKind;

    fn node(path: &[usize], text: &str) -> TextNodeRef {
        TextNodeRef {
            part_name: "word/document.xml".to_string(),
            kind: NodeKind::WT,
            path: path.to_vec(),
            attr_name: None,
            original_text: text.to_string(),
        }
    }

    fn span(text: &str, refs: Vec<TextNodeRef>) -> FormatSpan {
        FormatSpan {
            style_sig: "b".to_string(),
            node_refs: refs,
            source_text: text.to_string(),
        }
    }

    #[test]
    fn allocate_plain_counts_sums_to_total() {
        let out = allocate_plain_counts(10, &[1, 1, 1]);
        assert_eq!(out.iter().sum::<usize>(), 10);
    }

    #[test]
    fn allocate_plain_counts_zero_weights_splits_evenly() {
        let out = allocate_plain_counts(9, &[0, 0, 0]);
        assert_eq!(out, vec![3, 3, 3]);
    }

    #[test]
    fn project_single_span_roundtrips_whole_text() {
        let refs = vec![node(&[0], "hello")];
        let spans = vec![span("hello", refs)];
        let nt_map = HashMap::new();
        let out = project_translation_to_spans(&spans, "hello", "bonjour", &nt_map).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "bonjour");
    }

    #[test]
    fn project_rejects_control_token_mismatch() {
        let refs = vec![node(&[0], "hello")];
        let spans = vec![span("hello", refs)];
        let nt_map = HashMap::new();
        let source = format!("hello{}", crate::sentinels::TAB);
        let err = project_translation_to_spans(&spans, &source, "bonjour", &nt_map).unwrap_err();
        assert!(matches!(err, DocError::Protocol { .. }));
    }

    #[test]
    fn distribute_span_text_proportional_to_node_length() {
        let refs = vec![node(&[0], "aaaa"), node(&[1], "bb")];
        let s = span("aaaabb", refs);
        let out = distribute_span_text_to_nodes(&s, "ABCDEF");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1.len() + out[1].1.len(), 6);
    }

    #[test]
    fn distribute_span_text_single_node_gets_everything() {
        let refs = vec![node(&[0], "hello")];
        let s = span("hello", refs);
        let out = distribute_span_text_to_nodes(&s, "bonjour");
        assert_eq!(out, vec![(node(&[0], "hello"), "bonjour".to_string())]);
    }
}
