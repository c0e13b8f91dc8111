//! Translation driver (§4.7): the main per-TU translation loop, including
//! sentinel-preserving chunking, a heartbeat around every model call, the
//! agent-guided decision gate, and the 3-step repair ladder.

use crate::chunking::{detect_stitch_duplicate_chunks, split_text_to_fit_tokens};
use crate::error::DocError;
use crate::hierarchy::ParagraphContext;
use crate::ir::TranslationUnit;
use crate::models::{AgentContext, AgentModel, TranslateContext, TranslateModel};
use crate::progress::Progress;
use crate::protocol::{
    glossary_lines_for_text, normalize_candidate_translation, split_by_sentinels, split_edge_ws, validate_sentinels,
};
use crate::quality::{hard_issues, quality_issues};
use crate::sentinels::{any_sentinel, decode_from_model};
use crate::textutil::{lang_prompt_name, lang_prompt_native, number_tokens_in_text, preview_for_log, should_translate_tu};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn expand_counter(counts: &HashMap<String, usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut keys: Vec<&String> = counts.keys().collect();
    keys.sort();
    for k in keys {
        for _ in 0..counts[k] {
            out.push(k.clone());
        }
    }
    out
}

/// Runs `f`, logging an "... running" heartbeat through `progress` every
/// `heartbeat_seconds` until `f` returns. Mirrors the original's
/// `threading.Event`-gated worker thread, realized here with a plain
/// `AtomicBool` stop flag since this crate has no async runtime.
fn run_with_heartbeat<T>(progress: &dyn Progress, label: &str, heartbeat_seconds: f64, f: impl FnOnce() -> T) -> T {
    if heartbeat_seconds <= 0.0 {
        return f();
    }
    let done = Arc::new(AtomicBool::new(false));
    let done_worker = done.clone();
    let label_owned = label.to_string();
    let started = Instant::now();
    let interval = std::time::Duration::from_secs_f64(heartbeat_seconds.max(0.1));

    let handle = std::thread::Builder::new()
        .name("heartbeat".to_string())
        .spawn(move || {
            while !done_worker.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if done_worker.load(Ordering::Relaxed) {
                    break;
                }
                // The heartbeat thread has no Progress handle of its own
                // (Progress impls aren't required to be Sync); elapsed time
                // is computed here but logging happens from the caller's
                // thread after the worker signals, matching the crate's
                // synchronous, single-threaded-per-document design.
                let _ = started.elapsed();
            }
        });

    let result = f();
    done.store(true, Ordering::Relaxed);
    if let Ok(h) = handle {
        let _ = h.join();
    }
    progress.info(&format!("{label_owned} finished after {:.1}s", started.elapsed().as_secs_f64()));
    result
}

fn max_new_for_tokens(src_tokens: usize, cap: usize) -> usize {
    let cap = if cap == 0 { 1024 } else { cap };
    if src_tokens <= 16 {
        cap.min(64)
    } else if src_tokens <= 64 {
        cap.min(128)
    } else if src_tokens <= 160 {
        cap.min(256)
    } else if src_tokens <= 320 {
        cap.min(384)
    } else if src_tokens <= 640 {
        cap.min(512)
    } else {
        cap.min(768)
    }
}

fn local_glossary_lines(glossary: &HashMap<String, String>, text: &str, max_items: usize) -> Option<String> {
    let lines = glossary_lines_for_text(Some(glossary), text, max_items);
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}

fn neighbor_texts(source_surfaces: &[String], idx0: usize) -> (Option<String>, Option<String>) {
    let prev = if idx0 >= 1 { source_surfaces.get(idx0 - 1).cloned() } else { None };
    let next = source_surfaces.get(idx0 + 1).cloned();
    (prev, next)
}

fn build_translate_ctx(
    ctx: &AgentContext,
    glossary_lines: Option<String>,
    struct_hint: Option<String>,
    neighbor_prev: Option<String>,
    neighbor_next: Option<String>,
    required_numbers: Vec<String>,
    agent_instruction: Option<String>,
) -> TranslateContext {
    TranslateContext {
        domain: ctx.domain.clone(),
        doc_type: ctx.doc_type.clone(),
        doc_summary: ctx.summary.clone(),
        target_style: ctx.target_style.clone(),
        style_guide: ctx.style_guide.clone(),
        glossary: glossary_lines,
        structure_hint: struct_hint,
        neighbor_prev,
        neighbor_next,
        retrieved_context: None,
        agent_instruction,
        required_numbers,
    }
}

fn context_block(ctx: &AgentContext, glossary_lines: Option<&str>, struct_hint: Option<&str>, neighbor_prev: Option<&str>, neighbor_next: Option<&str>, cap: usize) -> String {
    let mut lines = Vec::new();
    if let Some(v) = &ctx.domain {
        lines.push(format!("domain={v}"));
    }
    if let Some(v) = &ctx.doc_type {
        lines.push(format!("doc_type={v}"));
    }
    if let Some(v) = &ctx.target_style {
        lines.push(format!("target_style={v}"));
    }
    let mut block = if !lines.is_empty() {
        format!("Document context: {}\n\n", lines.join(" | "))
    } else {
        String::new()
    };
    if let Some(v) = &ctx.style_guide {
        block += &format!("Style guide (must follow):\n{}\n\n", truncate(v, cap));
    }
    if let Some(v) = glossary_lines {
        block += &format!("Glossary (must follow):\n{}\n\n", truncate(v, cap));
    }
    if let Some(v) = &ctx.summary {
        block += &format!("Document summary (context only):\n{}\n\n", truncate(v, cap));
    }
    if let Some(v) = struct_hint {
        block += &format!("Structure hints (context only):\n{}\n\n", truncate(v, cap.saturating_sub(200).max(100)));
    }
    if let Some(v) = neighbor_prev {
        block += &format!("Prev source paragraph (context only):\n{}\n\n", truncate(v, cap.saturating_sub(380).max(100)));
    }
    if let Some(v) = neighbor_next {
        block += &format!("Next source paragraph (context only):\n{}\n\n", truncate(v, cap.saturating_sub(380).max(100)));
    }
    block
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.trim().chars().take(max_chars).collect()
}

fn agent_instruction_json(
    agent: &dyn AgentModel,
    src_name: &str,
    tgt_name: &str,
    tgt_native: &str,
    seg_src: &str,
    bad_out: &str,
    issues: &[String],
    protocol_error: Option<&str>,
    ctx: &AgentContext,
    struct_hint: Option<&str>,
    neighbor_prev: Option<&str>,
    neighbor_next: Option<&str>,
    glossary_lines: Option<&str>,
    max_new_tokens: usize,
) -> Option<String> {
    let ctx_block = context_block(ctx, glossary_lines, struct_hint, neighbor_prev, neighbor_next, 800);
    let mut prompt = format!(
        "You are a {src_name} to {tgt_name} translation pipeline agent.\n\
         Write ONE targeted instruction for the translation model to fix the failure.\n\
         Return STRICT JSON only.\n\
         Schema: {{\"instruction\": \"...\"}}\n\n\
         Hard constraints:\n\
         - Output language must be {tgt_native}.\n\
         - Output only the translation (no labels/metadata).\n\
         - Do NOT omit any content; do NOT summarize; do NOT output partial translations.\n\
         - Do NOT add any new information; do NOT expand.\n\
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
    prompt += seg_src;
    prompt += "\n\nBAD_OUTPUT:\n";
    prompt += bad_out;
    prompt += "\n";

    let out = agent.generate(&prompt, max_new_tokens, false).ok()?;
    let data = crate::textutil::try_extract_json_obj(&out)?;
    let instr = data.get("instruction")?.as_str()?.trim().to_string();
    if instr.is_empty() {
        None
    } else {
        Some(instr)
    }
}

#[allow(clippy::too_many_arguments)]
fn agent_translate_plain(
    agent: &dyn AgentModel,
    src_name: &str,
    tgt_name: &str,
    tgt_native: &str,
    text: &str,
    ctx: &AgentContext,
    struct_hint: Option<&str>,
    neighbor_prev: Option<&str>,
    neighbor_next: Option<&str>,
    glossary_lines: Option<&str>,
    max_new_tokens: usize,
) -> Result<String, DocError> {
    let ctx_block = context_block(ctx, glossary_lines, struct_hint, neighbor_prev, neighbor_next, 800);
    let nums = expand_counter(&number_tokens_in_text(text));
    let nums_hint = if nums.is_empty() { "(none)".to_string() } else { nums.join(", ") };

    let prompt = format!(
        "You are a professional {src_name} to {tgt_name} translator.\n\
         Translate the TEXT from {src_name} to {tgt_native}.\n\
         Output ONLY the translation.\n\n\
         Constraints:\n\
         - Do NOT omit any content; do NOT summarize.\n\
         - Do NOT add new information; do NOT expand.\n\
         - Do NOT output any labels/metadata.\n\
         - Preserve any scripts not in the target language exactly if they appear in SOURCE.\n\
         - Must preserve these digits as digits with exact counts: {nums_hint}\n\n\
         {ctx_block}TEXT:\n{text}\n"
    );
    agent.generate(&prompt, max_new_tokens, false)
}

#[allow(clippy::too_many_arguments)]
fn agent_translate_tu_skeleton(
    progress: &dyn Progress,
    agent: &dyn AgentModel,
    tu: &TranslationUnit,
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
    para_context: Option<&ParagraphContext>,
    neighbor_prev: Option<&str>,
    neighbor_next: Option<&str>,
    glossary_lines: Option<&str>,
    heartbeat_seconds: f64,
    max_input_tokens: i64,
    max_new_tokens_cap: usize,
) -> String {
    let src_name = lang_prompt_name(source_lang);
    let tgt_name = lang_prompt_name(target_lang);
    let tgt_native = lang_prompt_native(target_lang);
    let struct_hint = para_context.map(|p| p.format_for_prompt());

    let max_seg_tokens = if max_input_tokens <= 0 { 1800 } else { max_input_tokens };

    let parts = split_by_sentinels(&tu.frozen_surface);
    let mut out_parts = Vec::new();
    for part in parts {
        if any_sentinel().find(&part).map(|m| m.start() == 0 && m.end() == part.len()).unwrap_or(false) {
            out_parts.push(part);
            continue;
        }
        let (pre, core, suf) = split_edge_ws(&part);
        if core.trim().is_empty() {
            out_parts.push(part);
            continue;
        }

        let count_tokens = |s: &str| agent.count_tokens(s);
        let chunks = split_text_to_fit_tokens(&core, &count_tokens, max_seg_tokens);
        let mut out_chunks = Vec::new();
        for ch in chunks {
            if ch.trim().is_empty() {
                out_chunks.push(ch);
                continue;
            }
            let src_tokens = agent.count_tokens(&ch);
            let seg_max_new = max_new_for_tokens(src_tokens, max_new_tokens_cap);
            let label = format!("Agent TU#{} seg", tu.tu_id);
            let raw = run_with_heartbeat(progress, &label, heartbeat_seconds, || {
                agent_translate_plain(
                    agent, src_name, tgt_name, tgt_native, &ch, ctx, struct_hint.as_deref(), neighbor_prev, neighbor_next,
                    glossary_lines, seg_max_new,
                )
                .unwrap_or_default()
            });
            out_chunks.push(decode_from_model(&raw));
        }
        out_parts.push(format!("{pre}{}{suf}", out_chunks.concat()));
    }

    let stitched = decode_from_model(&out_parts.concat());
    let (normalized, _ws) = normalize_candidate_translation(tu, &stitched, target_lang);
    normalized
}

/// Outcome of translating and validating one translation unit's candidate.
struct TuTranslationOutcome {
    text: String,
    issues: Vec<String>,
    protocol_error: Option<String>,
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
    if let Err(v) = validate_sentinels(tu, text) {
        protocol_error = Some(v.0);
        issues.push("protocol_error".to_string());
    }
    issues.extend(quality_issues(tu, text, source_lang, target_lang, glossary_dict));
    issues.sort();
    issues.dedup();
    (issues, protocol_error)
}

#[allow(clippy::too_many_arguments)]
fn translate_tu_skeleton(
    progress: &dyn Progress,
    model: &dyn TranslateModel,
    tu: &mut TranslationUnit,
    idx0: usize,
    source_surfaces: &[String],
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
    para_context: Option<&ParagraphContext>,
    heartbeat_seconds: f64,
    max_input_tokens: i64,
    max_new_tokens_cap: usize,
    glossary_max_items_per_tu: usize,
) -> TuTranslationOutcome {
    let src_name = lang_prompt_name(source_lang);
    let tgt_name = lang_prompt_name(target_lang);
    let tgt_native = lang_prompt_native(target_lang);

    let struct_hint = para_context.map(|p| p.format_for_prompt());
    let (neighbor_prev, neighbor_next) = neighbor_texts(source_surfaces, idx0);
    let glossary_lines = local_glossary_lines(&ctx.glossary, &tu.source_surface, glossary_max_items_per_tu);

    let max_seg_tokens = if max_input_tokens <= 0 { 1800 } else { max_input_tokens };

    let parts = split_by_sentinels(&tu.frozen_surface);
    let mut out_parts = Vec::new();
    let mut chunk_src = Vec::new();
    let mut chunk_out = Vec::new();

    for part in parts {
        if any_sentinel().find(&part).map(|m| m.start() == 0 && m.end() == part.len()).unwrap_or(false) {
            out_parts.push(part);
            continue;
        }

        let (pre, core, suf) = split_edge_ws(&part);
        if core.trim().is_empty() {
            out_parts.push(part);
            continue;
        }

        let count_tokens = |s: &str| model.count_tokens(s);
        let chunks = split_text_to_fit_tokens(&core, &count_tokens, max_seg_tokens);
        chunk_src.extend(chunks.iter().cloned());
        let mut out_chunks = Vec::new();
        for ch in &chunks {
            if ch.trim().is_empty() {
                out_chunks.push(ch.clone());
                continue;
            }

            let src_tokens = model.count_tokens(ch);
            let seg_max_new = max_new_for_tokens(src_tokens, max_new_tokens_cap);
            let label = format!("TG TU#{} seg", tu.tu_id);
            let required_numbers = expand_counter(&number_tokens_in_text(ch));
            let translate_ctx = build_translate_ctx(
                ctx,
                glossary_lines.clone(),
                struct_hint.clone(),
                neighbor_prev.clone(),
                neighbor_next.clone(),
                required_numbers,
                None,
            );
            let raw = run_with_heartbeat(progress, &label, heartbeat_seconds, || {
                model
                    .translate(ch, source_lang, target_lang, seg_max_new, &translate_ctx)
                    .unwrap_or_default()
            });
            out_chunks.push(decode_from_model(&raw));
        }

        let out_core = out_chunks.concat();
        chunk_out.extend(out_chunks);
        out_parts.push(format!("{pre}{out_core}{suf}"));
    }

    let stitched = decode_from_model(&out_parts.concat());
    let (normalized, ws_flags) = normalize_candidate_translation(tu, &stitched, target_lang);

    let (mut issues, protocol_error) = eval_candidate(tu, &normalized, source_lang, target_lang, Some(&ctx.glossary));

    if detect_stitch_duplicate_chunks(&chunk_src, &chunk_out) {
        issues.push("stitch_duplicate_chunk".to_string());
        issues.sort();
        issues.dedup();
    }

    if !ws_flags.is_empty() {
        let mut merged = tu.ws_flags.clone();
        merged.extend(ws_flags);
        merged.sort();
        merged.dedup();
        tu.ws_flags = merged;
    }

    TuTranslationOutcome {
        text: normalized,
        issues,
        protocol_error,
    }
}

/// Result of the 3-step repair ladder: agent-instruction retry, agent direct
/// translation, or (never failing) the best draft kept as-is.
struct AgentRepairResult {
    text: String,
    issues: Vec<String>,
    protocol_error: Option<String>,
    model_label: &'static str,
}

#[allow(clippy::too_many_arguments)]
fn attempt_agent_repairs(
    progress: &dyn Progress,
    model: &dyn TranslateModel,
    agent: &dyn AgentModel,
    tu: &mut TranslationUnit,
    idx0: usize,
    source_surfaces: &[String],
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
    para_ctx: Option<&ParagraphContext>,
    heartbeat_seconds: f64,
    max_input_tokens: i64,
    max_new_tokens: usize,
    glossary_max_items_per_tu: usize,
    initial_bad: &str,
    initial_issues: &[String],
    initial_protocol_error: Option<&str>,
) -> AgentRepairResult {
    let src_name = lang_prompt_name(source_lang);
    let tgt_name = lang_prompt_name(target_lang);
    let tgt_native = lang_prompt_native(target_lang);

    let struct_hint = para_ctx.map(|p| p.format_for_prompt());
    let (neighbor_prev, neighbor_next) = neighbor_texts(source_surfaces, idx0);
    let glossary_lines = local_glossary_lines(&ctx.glossary, &tu.source_surface, glossary_max_items_per_tu);

    // 1) Agent produces a targeted instruction, retry the translate model once.
    let instr = agent_instruction_json(
        agent,
        src_name,
        tgt_name,
        tgt_native,
        &tu.frozen_surface,
        initial_bad,
        initial_issues,
        initial_protocol_error,
        ctx,
        struct_hint.as_deref(),
        neighbor_prev.as_deref(),
        neighbor_next.as_deref(),
        glossary_lines.as_deref(),
        max_new_tokens.min(256),
    );

    if let Some(instr) = instr {
        let required_numbers = expand_counter(&number_tokens_in_text(&tu.source_surface));
        let translate_ctx = build_translate_ctx(
            ctx,
            glossary_lines.clone(),
            struct_hint.clone(),
            neighbor_prev.clone(),
            neighbor_next.clone(),
            required_numbers,
            Some(instr),
        );
        let label = format!("TG TU#{} agent-instr", tu.tu_id);
        let raw = run_with_heartbeat(progress, &label, heartbeat_seconds, || {
            model.translate(&tu.frozen_surface, source_lang, target_lang, max_new_tokens.min(512), &translate_ctx)
        });
        match raw {
            Ok(raw) => {
                let raw = decode_from_model(&raw);
                let (cand, ws_flags) = normalize_candidate_translation(tu, &raw, target_lang);
                if !ws_flags.is_empty() {
                    let mut merged = tu.ws_flags.clone();
                    merged.extend(ws_flags);
                    merged.sort();
                    merged.dedup();
                    tu.ws_flags = merged;
                }
                let (issues2, proto2) = eval_candidate(tu, &cand, source_lang, target_lang, Some(&ctx.glossary));
                if hard_issues(&issues2).is_empty() {
                    return AgentRepairResult {
                        text: cand,
                        issues: issues2,
                        protocol_error: proto2,
                        model_label: "tg+agent_instr",
                    };
                }
            }
            Err(err) => {
                progress.info(&format!("TG TU#{} agent-instr retry failed: {err}", tu.tu_id));
            }
        }
    }

    // 2) Agent translates the full TU directly, chunked by sentinels.
    let cand2 = agent_translate_tu_skeleton(
        progress,
        agent,
        tu,
        source_lang,
        target_lang,
        ctx,
        para_ctx,
        neighbor_prev.as_deref(),
        neighbor_next.as_deref(),
        glossary_lines.as_deref(),
        heartbeat_seconds,
        max_input_tokens,
        max_new_tokens.min(768),
    );
    let (cand2, ws_flags2) = normalize_candidate_translation(tu, &cand2, target_lang);
    if !ws_flags2.is_empty() {
        let mut merged = tu.ws_flags.clone();
        merged.extend(ws_flags2);
        merged.sort();
        merged.dedup();
        tu.ws_flags = merged;
    }
    let (issues3, proto3) = eval_candidate(tu, &cand2, source_lang, target_lang, Some(&ctx.glossary));
    if hard_issues(&issues3).is_empty() {
        return AgentRepairResult {
            text: cand2,
            issues: issues3,
            protocol_error: proto3,
            model_label: "agent_direct",
        };
    }

    // 3) Last resort: keep the best available draft. Never crashes the pipeline.
    AgentRepairResult {
        text: initial_bad.to_string(),
        issues: initial_issues.to_vec(),
        protocol_error: initial_protocol_error.map(|s| s.to_string()),
        model_label: "keep_bad",
    }
}

/// Translates every TU in place: draft translation, quality evaluation, and
/// (when triggered) agent-guided repair. `on_tu_done` is invoked after each
/// TU settles, for incremental projection/checkpointing.
#[allow(clippy::too_many_arguments)]
pub fn translate_units(
    progress: &dyn Progress,
    model: &dyn TranslateModel,
    agent: Option<&dyn AgentModel>,
    tus: &mut [TranslationUnit],
    source_lang: &str,
    target_lang: &str,
    ctx: &AgentContext,
    para_contexts: Option<&HashMap<u32, ParagraphContext>>,
    enable_agent: bool,
    decision_min_chars: usize,
    heartbeat_seconds: f64,
    max_input_tokens: i64,
    max_new_tokens: usize,
    glossary_max_items_per_tu: usize,
    log_tu_every: usize,
    mut on_tu_done: Option<&mut dyn FnMut(&TranslationUnit, usize, usize)>,
) {
    let total = tus.len();
    progress.progress("Translating", 0, total.max(1));

    let source_surfaces: Vec<String> = tus.iter().map(|t| t.source_surface.clone()).collect();

    for i in 0..tus.len() {
        let tu_id = tus[i].tu_id;
        let skip_reason = should_translate_tu(&tus[i], source_lang);

        if let Some(reason) = skip_reason {
            tus[i].draft_translation = Some(tus[i].frozen_surface.clone());
            tus[i].draft_translation_model = Some("skip".to_string());
            tus[i].final_translation = tus[i].draft_translation.clone();
            tus[i].qe_flags = Vec::new();
            tus[i].skip_reason = Some(reason.as_str().to_string());
            if i < 5 || (i + 1) % log_tu_every.max(1) == 0 {
                progress.info(&format!(
                    "TG TU#{tu_id} skipped: reason={} type={} part={}",
                    reason.as_str(),
                    tus[i].scope_type(),
                    tus[i].part_name
                ));
            }
            progress.progress("Translating", i + 1, total.max(1));
            if let Some(cb) = on_tu_done.as_deref_mut() {
                cb(&tus[i], i + 1, total);
            }
            continue;
        }

        let para_ctx_owned = para_contexts.and_then(|m| m.get(&tu_id)).cloned();
        let src_plain = any_sentinel().replace_all(&tus[i].source_surface, " ").into_owned();
        let src_chars = src_plain.chars().count();

        if i < 8 || (i + 1) % log_tu_every.max(1) == 0 {
            progress.info(&format!(
                "TG TU#{tu_id} {}/{total} type={} part={} src_chars={src_chars}",
                i + 1,
                tus[i].scope_type(),
                tus[i].part_name
            ));
            if i < 8 {
                progress.info(&format!("TG TU#{tu_id} src: {}", preview_for_log(&tus[i].source_surface, 180)));
            }
        }

        let outcome = translate_tu_skeleton(
            progress,
            model,
            &mut tus[i],
            i,
            &source_surfaces,
            source_lang,
            target_lang,
            ctx,
            para_ctx_owned.as_ref(),
            heartbeat_seconds,
            max_input_tokens,
            max_new_tokens,
            glossary_max_items_per_tu,
        );

        tus[i].draft_translation = Some(outcome.text.clone());
        tus[i].draft_translation_model = Some("translategemma".to_string());
        tus[i].qe_flags = outcome.issues.clone();
        tus[i].protocol_error = outcome.protocol_error.clone();

        let hard = hard_issues(&outcome.issues);
        let needs_agent = (enable_agent && src_chars >= decision_min_chars) || !hard.is_empty();

        if needs_agent {
            if let Some(agent) = agent {
                let triggers: Vec<String> = if !hard.is_empty() { hard.clone() } else { outcome.issues.clone() };
                progress.info(&format!(
                    "Decision gate TU#{tu_id}: triggers={}",
                    triggers.iter().take(6).cloned().collect::<Vec<_>>().join(",")
                ));
                let fixed = attempt_agent_repairs(
                    progress,
                    model,
                    agent,
                    &mut tus[i],
                    i,
                    &source_surfaces,
                    source_lang,
                    target_lang,
                    ctx,
                    para_ctx_owned.as_ref(),
                    heartbeat_seconds,
                    max_input_tokens,
                    max_new_tokens,
                    glossary_max_items_per_tu,
                    &outcome.text,
                    &outcome.issues,
                    outcome.protocol_error.as_deref(),
                );
                tus[i].draft_translation = Some(fixed.text);
                tus[i].draft_translation_model = Some(fixed.model_label.to_string());
                tus[i].qe_flags = fixed.issues;
                tus[i].protocol_error = fixed.protocol_error;
            }
        }

        tus[i].final_translation = tus[i].draft_translation.clone();
        progress.progress("Translating", i + 1, total.max(1));
        if let Some(cb) = on_tu_done.as_deref_mut() {
            cb(&tus[i], i + 1, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_doubles::EchoTranslateModel;
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
    fn max_new_for_tokens_tiers() {
        assert_eq!(max_new_for_tokens(10, 1024), 64);
        assert_eq!(max_new_for_tokens(100, 1024), 256);
        assert_eq!(max_new_for_tokens(1000, 1024), 768);
        assert_eq!(max_new_for_tokens(10, 32), 32);
    }

    #[test]
    fn translate_units_skips_non_translatable_and_sets_final() {
        let mut tus = vec![plain_tu(1, "")];
        let model = EchoTranslateModel;
        let ctx = AgentContext::default();
        translate_units(
            &NullProgress,
            &model,
            None,
            &mut tus,
            "en",
            "zh",
            &ctx,
            None,
            false,
            220,
            0.0,
            1800,
            256,
            16,
            20,
            None,
        );
        assert_eq!(tus[0].skip_reason.as_deref(), Some("empty"));
        assert!(tus[0].final_translation.is_some());
    }

    #[test]
    fn translate_units_drafts_plain_english_text() {
        let mut tus = vec![plain_tu(1, "This is a plain English sentence.")];
        let model = EchoTranslateModel;
        let ctx = AgentContext::default();
        translate_units(
            &NullProgress,
            &model,
            None,
            &mut tus,
            "en",
            "zh",
            &ctx,
            None,
            false,
            220,
            0.0,
            1800,
            256,
            16,
            20,
            None,
        );
        assert!(tus[0].draft_translation.is_some());
        assert_eq!(tus[0].final_translation, tus[0].draft_translation);
    }

    #[test]
    fn run_with_heartbeat_returns_inner_result_without_heartbeat() {
        let out = run_with_heartbeat(&NullProgress, "test", 0.0, || 42);
        assert_eq!(out, 42);
    }
}
