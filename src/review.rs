//! Review/repair (§4.11): an optional final agent pass that rewrites TUs
//! flagged by a decision gate, followed by bounded rounds of hard-failure
//! repair driven by the same agent.

use crate::hierarchy::ParagraphContext;
use crate::ir::TranslationUnit;
use crate::models::{AgentContext, AgentModel};
use crate::progress::Progress;
use crate::protocol::{glossary_lines_for_text, normalize_candidate_translation, validate_sentinels};
use crate::quality::{hard_issues, quality_issues};
use crate::sentinels::{any_sentinel, decode_from_model};
use crate::textutil::{
    lang_prompt_name, lang_prompt_native, preview_for_log, should_translate_tu, try_extract_json_obj,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn decision_risk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(shall|must|may\s+not|may|unless|provided\s+that|in\s+the\s+event|notwithstanding|subject\s+to|void|invalid|terminate|termination|breach|indemnif|representation|warrant|condition|governing\s+law|jurisdiction|assignment|transfer|consent|notice|default)\b",
        )
        .unwrap()
    })
}

/// A TU whose final translation still fails hard validation after the
/// driver and any review pass.
#[derive(Debug, Clone)]
pub struct HardFailure {
    pub tu_id: u32,
    pub skip_reason: Option<crate::textutil::SkipReason>,
    pub issues: Vec<String>,
    pub protocol_error: Option<String>,
}

fn needs_review(
    tu: &TranslationUnit,
    issues: &[String],
    para_ctx: Option<&ParagraphContext>,
    decision_min_chars: usize,
) -> bool {
    if !hard_issues(issues).is_empty() {
        return true;
    }
    if tu.force_ape {
        return true;
    }
    let src_plain = any_sentinel().replace_all(&tu.source_surface, " ");
    if src_plain.chars().count() >= decision_min_chars {
        return true;
    }
    if let Some(ctx) = para_ctx {
        if ctx.is_heading || ctx.list_level.is_some() || ctx.in_table {
            return true;
        }
    }
    decision_risk_re().is_match(&src_plain)
}

fn eval_candidate(
    tu: &TranslationUnit,
    text: &str,
    source_lang: &str,
    target_lang: &str,
    glossary_dict: Option<&HashMap<String, String>>,
) -> (Vec<String>, Option<String>) {
    let mut issues = Vec::new();
    let mut protocol_error = None;
    if let Err(violation) = validate_sentinels(tu, text) {
        protocol_error = Some(violation.0);
        issues.push("protocol_error".to_string());
    }
    issues.extend(quality_issues(tu, text, source_lang, target_lang, glossary_dict));
    issues.sort();
    issues.dedup();
    (issues, protocol_error)
}

#[allow(clippy::too_many_arguments)]
fn review_prompt(
    src_name: &str,
    tgt_name: &str,
    tgt_native: &str,
    ctx: &AgentContext,
    struct_hint: Option<&str>,
    neighbor_prev: Option<&str>,
    neighbor_next: Option<&str>,
    glossary_lines: Option<&str>,
    issues: &[String],
    protocol_error: Option<&str>,
    source_text: &str,
    draft: &str,
) -> String {
    let mut ctx_lines = Vec::new();
    if let Some(v) = &ctx.domain {
        ctx_lines.push(format!("domain={v}"));
    }
    if let Some(v) = &ctx.doc_type {
        ctx_lines.push(format!("doc_type={v}"));
    }
    if let Some(v) = &ctx.target_style {
        ctx_lines.push(format!("target_style={v}"));
    }
    let mut ctx_block = if !ctx_lines.is_empty() {
        format!("Document context: {}\n\n", ctx_lines.join(" | "))
    } else {
        String::new()
    };
    if let Some(v) = &ctx.style_guide {
        ctx_block += &format!("Style guide (must follow):\n{}\n\n", truncate(v, 900));
    }
    if let Some(v) = glossary_lines {
        ctx_block += &format!("Glossary (must follow):\n{}\n\n", truncate(v, 900));
    }
    if let Some(v) = &ctx.summary {
        ctx_block += &format!("Document summary (context only):\n{}\n\n", truncate(v, 900));
    }
    if let Some(v) = struct_hint {
        ctx_block += &format!("Structure hints (context only):\n{}\n\n", truncate(v, 700));
    }
    if let Some(v) = neighbor_prev {
        ctx_block += &format!("Prev source paragraph (context only):\n{}\n\n", truncate(v, 520));
    }
    if let Some(v) = neighbor_next {
        ctx_block += &format!("Next source paragraph (context only):\n{}\n\n", truncate(v, 520));
    }

    let role_desc = if let Some(v) = &ctx.doc_type {
        format!("{} translation reviewer", v.trim())
    } else if let Some(v) = &ctx.domain {
        format!("{} translation reviewer", v.trim())
    } else {
        "translation reviewer".to_string()
    };

    let mut prompt = format!(
        "You are a professional {src_name} to {tgt_name} {role_desc}.\n\
         Target language: {tgt_native}.\n\
         Task: Review DRAFT against SOURCE and decide whether a rewrite is needed.\n\
         Return STRICT JSON only.\n\
         Schema: {{\"ok\": true/false, \"score\": 0-100, \"rewrite\": \"...\", \"flags\": [\"...\"]}}\n\n\
         Hard constraints for rewrite:\n\
         - Output ONLY the translation (no labels/metadata).\n\
         - Do NOT omit any content; do NOT summarize.\n\
         - Do NOT add new information; do NOT expand.\n\
         - Do NOT introduce any new conditions/limitations/exceptions that are not in the source.\n\
         - Preserve all placeholder tokens exactly; do not add/remove/reorder.\n\n"
    );
    if let Some(err) = protocol_error {
        prompt += &format!("protocol_error: {err}\n");
    }
    if !issues.is_empty() {
        prompt += &format!("issues: {}\n\n", issues.join(", "));
    } else {
        prompt += "\n";
    }
    prompt += &ctx_block;
    prompt += "SOURCE:\n";
    prompt += source_text;
    prompt += "\n\nDRAFT:\n";
    prompt += draft;
    prompt += "\n";
    prompt
}

fn truncate(s: &str, max_chars: usize) -> String {
    let t = s.trim();
    t.chars().take(max_chars).collect()
}

/// Scans every translatable TU's current output translation for hard
/// (non-cosmetic) issues.
pub fn scan_hard_failures(
    tus: &[TranslationUnit],
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
) -> Vec<HardFailure> {
    let mut failures = Vec::new();
    for tu in tus {
        let skip_reason = should_translate_tu(tu, source_lang);
        if skip_reason.is_some() {
            continue;
        }
        let final_text = tu
            .final_translation
            .as_deref()
            .or(tu.draft_translation.as_deref())
            .unwrap_or(&tu.frozen_surface);
        let (issues, proto) = eval_candidate(tu, final_text, source_lang, target_lang, Some(&ctx.glossary));
        if !hard_issues(&issues).is_empty() {
            failures.push(HardFailure {
                tu_id: tu.tu_id,
                skip_reason,
                issues,
                protocol_error: proto,
            });
        }
    }
    failures
}

#[allow(clippy::too_many_arguments)]
pub fn final_review_and_repair(
    progress: &dyn Progress,
    agent: Option<&dyn AgentModel>,
    tus: &mut [TranslationUnit],
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
    para_contexts: Option<&HashMap<u32, ParagraphContext>>,
    decision_min_chars: usize,
    glossary_max_items_per_tu: usize,
    max_new_tokens: usize,
    repair_rounds: usize,
    log_tu_every: usize,
    mut on_tu_revised: Option<&mut dyn FnMut(&TranslationUnit)>,
) {
    let total = tus.len();

    let Some(agent) = agent else {
        for tu in tus.iter_mut() {
            tu.final_translation = Some(
                tu.draft_translation
                    .clone()
                    .unwrap_or_else(|| tu.frozen_surface.clone()),
            );
        }
        return;
    };

    progress.info("Final review enabled: agent review + strict hard-failure scan");
    progress.progress("Final review", 0, total.max(1));

    let src_name = lang_prompt_name(source_lang);
    let tgt_name = lang_prompt_name(target_lang);
    let tgt_native = lang_prompt_native(target_lang);

    let source_surfaces: Vec<String> = tus.iter().map(|tu| tu.source_surface.clone()).collect();

    for i in 0..tus.len() {
        let should_skip = should_translate_tu(&tus[i], source_lang).is_some();
        let draft = tus[i]
            .final_translation
            .clone()
            .or_else(|| tus[i].draft_translation.clone())
            .unwrap_or_else(|| tus[i].frozen_surface.clone());

        if should_skip {
            tus[i].final_translation = Some(draft);
            progress.progress("Final review", i + 1, total.max(1));
            continue;
        }

        let para_ctx = para_contexts.and_then(|m| m.get(&tus[i].tu_id));
        let struct_hint = para_ctx.map(|p| p.format_for_prompt());
        let neighbor_prev = if i >= 1 { Some(source_surfaces[i - 1].as_str()) } else { None };
        let neighbor_next = source_surfaces.get(i + 1).map(|s| s.as_str());
        let glossary_lines = glossary_lines_for_text(Some(&ctx.glossary), &tus[i].source_surface, glossary_max_items_per_tu);
        let glossary_lines = if glossary_lines.is_empty() { None } else { Some(glossary_lines.as_str()) };

        let (issues, proto) = eval_candidate(&tus[i], &draft, source_lang, target_lang, Some(&ctx.glossary));
        if !needs_review(&tus[i], &issues, para_ctx, decision_min_chars) {
            tus[i].final_translation = Some(draft);
            progress.progress("Final review", i + 1, total.max(1));
            continue;
        }

        let prompt = review_prompt(
            src_name,
            tgt_name,
            tgt_native,
            ctx,
            struct_hint.as_deref(),
            neighbor_prev,
            neighbor_next,
            glossary_lines,
            &issues,
            proto.as_deref(),
            &tus[i].frozen_surface,
            &draft,
        );

        let tu_id = tus[i].tu_id;
        let out = match agent.generate(&prompt, max_new_tokens.min(640), false) {
            Ok(out) => out,
            Err(err) => {
                progress.info(&format!("Final review TU#{tu_id} failed: {err}"));
                tus[i].final_translation = Some(draft);
                progress.progress("Final review", i + 1, total.max(1));
                continue;
            }
        };

        let data = try_extract_json_obj(&out);
        let mut rewrite = String::new();
        if let Some(obj) = &data {
            if let Some(r) = obj.get("rewrite").and_then(|v| v.as_str()) {
                rewrite = r.trim().to_string();
            }
            if let Some(s) = obj.get("score").and_then(|v| v.as_i64()) {
                tus[i].qe_score = Some(s.clamp(0, 100) as u8);
            }
        }

        if rewrite.is_empty() {
            tus[i].final_translation = Some(draft);
            let log_every = (tu_id <= 5)
                || (tu_id as usize % log_tu_every.max(1) == 0)
                || !hard_issues(&issues).is_empty();
            if log_every {
                progress.info(&format!(
                    "Final review TU#{tu_id}: keep score={:?} skip={:?}",
                    tus[i].qe_score, tus[i].skip_reason
                ));
            }
            progress.progress("Final review", i + 1, total.max(1));
            continue;
        }

        let cand_decoded = decode_from_model(&rewrite);
        let (cand, ws_flags) = normalize_candidate_translation(&tus[i], &cand_decoded, target_lang);
        if !ws_flags.is_empty() {
            let mut merged = tus[i].ws_flags.clone();
            merged.extend(ws_flags);
            merged.sort();
            merged.dedup();
            tus[i].ws_flags = merged;
        }
        let (new_issues, _new_proto) = eval_candidate(&tus[i], &cand, source_lang, target_lang, Some(&ctx.glossary));

        let new_hard = hard_issues(&new_issues);
        if !new_hard.is_empty() {
            tus[i].final_translation = Some(draft);
            progress.info(&format!(
                "Final review TU#{tu_id}: rewrite rejected (issues={})",
                new_hard.iter().take(5).cloned().collect::<Vec<_>>().join(",")
            ));
        } else {
            tus[i].final_translation = Some(cand);
            tus[i].qe_flags = new_issues;
            if let Some(cb) = on_tu_revised.as_deref_mut() {
                cb(&tus[i]);
            }
        }
        progress.progress("Final review", i + 1, total.max(1));
    }

    let mut failures = scan_hard_failures(tus, source_lang, target_lang, ctx);
    if failures.is_empty() {
        return;
    }
    progress.info(&format!(
        "Hard failures detected: {}. Running automatic repair with agent.",
        failures.len()
    ));

    for round_idx in 0..repair_rounds {
        failures = scan_hard_failures(tus, source_lang, target_lang, ctx);
        if failures.is_empty() {
            return;
        }
        progress.info(&format!(
            "Hard-failure repair round {}/{repair_rounds}: items={}",
            round_idx + 1,
            failures.len()
        ));

        for failure in &failures {
            let idx = match tus.iter().position(|tu| tu.tu_id == failure.tu_id) {
                Some(idx) => idx,
                None => continue,
            };
            let draft = tus[idx]
                .final_translation
                .clone()
                .or_else(|| tus[idx].draft_translation.clone())
                .unwrap_or_else(|| tus[idx].frozen_surface.clone());
            let para_ctx = para_contexts.and_then(|m| m.get(&tus[idx].tu_id));
            let struct_hint = para_ctx.map(|p| p.format_for_prompt());
            let glossary_lines =
                glossary_lines_for_text(Some(&ctx.glossary), &tus[idx].source_surface, glossary_max_items_per_tu);

            let mut fix_prompt = format!(
                "You are a professional {src_name} to {tgt_name} translator and editor.\n\
                 Fix DRAFT to satisfy ALL constraints.\n\
                 Output language must be {tgt_native}.\n\
                 Output ONLY the fixed translation.\n\n\
                 Constraints:\n\
                 - Do NOT omit any content; do NOT summarize.\n\
                 - Do NOT add new information; do NOT expand.\n\
                 - Do NOT introduce any new conditions/limitations/exceptions.\n\
                 - Preserve all placeholder tokens exactly; do not add/remove/reorder.\n\n"
            );
            if let Some(hint) = &struct_hint {
                fix_prompt += &format!("Structure hints (context only):\n{}\n\n", truncate(hint, 700));
            }
            if !glossary_lines.is_empty() {
                fix_prompt += &format!("Glossary (must follow):\n{}\n\n", truncate(&glossary_lines, 900));
            }
            if let Some(summary) = &ctx.summary {
                fix_prompt += &format!("Document summary (context only):\n{}\n\n", truncate(summary, 900));
            }
            fix_prompt += "SOURCE:\n";
            fix_prompt += &tus[idx].frozen_surface;
            fix_prompt += "\n\nDRAFT:\n";
            fix_prompt += &draft;
            fix_prompt += "\n";

            let tu_id = tus[idx].tu_id;
            let out = match agent.generate(&fix_prompt, max_new_tokens.min(768), false) {
                Ok(out) => out,
                Err(err) => {
                    progress.info(&format!("Hard-failure repair TU#{tu_id} failed: {err}"));
                    continue;
                }
            };

            let cand_decoded = decode_from_model(&out);
            let (cand, ws_flags) = normalize_candidate_translation(&tus[idx], &cand_decoded, target_lang);
            if !ws_flags.is_empty() {
                let mut merged = tus[idx].ws_flags.clone();
                merged.extend(ws_flags);
                merged.sort();
                merged.dedup();
                tus[idx].ws_flags = merged;
            }
            let (new_issues, _) = eval_candidate(&tus[idx], &cand, source_lang, target_lang, Some(&ctx.glossary));
            let new_hard = hard_issues(&new_issues);
            if !new_hard.is_empty() {
                progress.info(&format!(
                    "Hard-failure repair TU#{tu_id} still has issues: {} src={}",
                    new_hard.iter().take(6).cloned().collect::<Vec<_>>().join(","),
                    preview_for_log(&tus[idx].source_surface, 120)
                ));
                continue;
            }

            tus[idx].final_translation = Some(cand);
            tus[idx].qe_flags = new_issues;
            if let Some(cb) = on_tu_revised.as_deref_mut() {
                cb(&tus[idx]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_doubles::ScriptedAgentModel;
    use crate::progress::NullProgress;

    fn plain_tu(tu_id: u32, text: &str) -> TranslationUnit {
        TranslationUnit::new(
            tu_id,
            "word/document.xml".into(),
            format!("x#w:p@{tu_id}"),
            vec![],
            vec![],
            text.to_string(),
            text.to_string(),
            Default::default(),
        )
    }

    #[test]
    fn needs_review_true_for_long_source() {
        let tu = plain_tu(1, &"a".repeat(300));
        assert!(needs_review(&tu, &[], None, 220));
    }

    #[test]
    fn needs_review_false_for_short_plain_text() {
        let tu = plain_tu(1, "hello");
        assert!(!needs_review(&tu, &[], None, 220));
    }

    #[test]
    fn needs_review_true_for_risk_word() {
        let tu = plain_tu(1, "this clause shall apply");
        assert!(needs_review(&tu, &[], None, 220));
    }

    #[test]
    fn final_review_without_agent_promotes_draft() {
        let mut tus = vec![plain_tu(1, "hello")];
        tus[0].draft_translation = Some("bonjour".to_string());
        let ctx = AgentContext::default();
        final_review_and_repair(
            &NullProgress,
            None,
            &mut tus,
            "en",
            "fr",
            &ctx,
            None,
            220,
            16,
            1024,
            2,
            20,
            None,
        );
        assert_eq!(tus[0].final_translation.as_deref(), Some("bonjour"));
    }

    #[test]
    fn final_review_sets_final_translation_after_agent_pass() {
        let mut tu = plain_tu(1, &"a".repeat(250));
        tu.draft_translation = Some("a".repeat(250));
        let mut tus = vec![tu];
        let ctx = AgentContext::default();
        let agent = ScriptedAgentModel::new(vec!["{\"ok\": false, \"score\": 10, \"rewrite\": \"short\"}".to_string()]);
        final_review_and_repair(
            &NullProgress,
            Some(&agent),
            &mut tus,
            "en",
            "fr",
            &ctx,
            None,
            220,
            16,
            1024,
            2,
            20,
            None,
        );
        assert!(tus[0].final_translation.is_some());
    }
}
