//! Orchestration entry point (§6): wires package I/O, extraction, the
//! translation driver, review/repair, and projection into one call.
//!
//! Unlike the reference implementation, this crate never loads an
//! inference engine itself — the caller supplies a [`TranslateModel`] and
//! an optional [`AgentModel`], already built, along with whatever
//! [`AgentContext`] (domain/style/glossary) it wants applied. Everything
//! downstream of "models exist" is this module's job.

use crate::checkpoint::CheckpointWriter;
use crate::config::Settings;
use crate::error::DocError;
use crate::extract::extract_scopes_from_xml;
use crate::freezer::freeze_text;
use crate::hierarchy::{build_paragraph_contexts, ParagraphContext};
use crate::ir::TranslationUnit;
use crate::legal_refs::rewrite_nt_maps_for_target_lang;
use crate::models::{AgentContext, AgentModel, TranslateModel};
use crate::package::{parse_xml_part, serialize_xml_part, structure_hash, DocxPackage, XmlNode, XmlPart};
use crate::progress::Progress;
use crate::project::{distribute_span_text_to_nodes, project_translation_to_spans};
use crate::quality::hard_issues;
use crate::review::{final_review_and_repair, scan_hard_failures};
use crate::textutil::{detect_language_pair_from_tus, preview_for_log};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const W_T: &str = "w:t";
const W_DEL_TEXT: &str = "w:delText";
const A_T: &str = "a:t";
const XML_SPACE: &str = "xml:space";

fn text_qnames() -> HashSet<&'static str> {
    [W_T, W_DEL_TEXT, A_T].into_iter().collect()
}

fn attr_qnames() -> HashSet<&'static str> {
    [XML_SPACE].into_iter().collect()
}

fn attr_pairs() -> HashSet<(&'static str, &'static str)> {
    [("w:lvlText", "w:val")].into_iter().collect()
}

/// Applies one TU's final (or draft) translation onto its backing XML
/// nodes, marking every part it touched as modified. Structural validity
/// is checked later, in bulk, via `structure_hash`.
fn apply_tu_translation(
    parts: &mut HashMap<String, XmlNode>,
    tu: &TranslationUnit,
    modified_parts: &mut HashSet<String>,
) -> Result<(), DocError> {
    let Some(final_text) = tu.output_translation() else {
        return Ok(());
    };
    let span_slices = project_translation_to_spans(&tu.spans, &tu.frozen_surface, final_text, &tu.nt_map)?;
    for slice in span_slices {
        for (node_ref, node_text) in distribute_span_text_to_nodes(&slice.span, &slice.text) {
            let Some(root) = parts.get_mut(&node_ref.part_name) else { continue };
            let Some(elem) = crate::package::node_at_path_mut(root, &node_ref.path) else { continue };
            if let Some(attr_name) = &node_ref.attr_name {
                elem.set_attr(attr_name, &node_text);
            } else {
                elem.set_text(&node_text);
                if node_text.starts_with(' ') || node_text.ends_with(' ') {
                    elem.set_attr(XML_SPACE, "preserve");
                }
            }
            modified_parts.insert(node_ref.part_name.clone());
        }
    }
    Ok(())
}

fn verify_and_serialize(
    parts: &HashMap<String, XmlNode>,
    modified_parts: &HashSet<String>,
    baseline_hash: &HashMap<String, String>,
    standalone: &HashMap<String, Option<bool>>,
) -> Result<HashMap<String, Vec<u8>>, DocError> {
    let mut replacements = HashMap::new();
    for name in modified_parts {
        let root = &parts[name];
        let hash = structure_hash(root, &text_qnames(), &attr_qnames(), Some(&attr_pairs()));
        if baseline_hash.get(name) != Some(&hash) {
            return Err(DocError::Structure(format!("non-text structure changed in {name}")));
        }
        let part = XmlPart {
            name: name.clone(),
            tree: root.clone(),
            standalone: standalone.get(name).copied().flatten(),
        };
        replacements.insert(name.clone(), serialize_xml_part(&part));
    }
    Ok(replacements)
}

/// Translates `input_path` (a `.docx` package) end to end and writes the
/// result to `output_path`. Writes the input back out unmodified when no
/// translatable text is found or the language pair can't be detected.
#[allow(clippy::too_many_arguments)]
pub fn translate_file(
    progress: &dyn Progress,
    settings: &Settings,
    translate_model: &dyn TranslateModel,
    agent_model: Option<&dyn AgentModel>,
    ctx: &AgentContext,
    input_path: &Path,
    output_path: &Path,
) -> Result<(), DocError> {
    progress.info(&format!("Input docx: {}", input_path.display()));
    progress.info(&format!("Output docx: {}", output_path.display()));

    let package = DocxPackage::open(input_path)?;
    progress.info("Reading DOCX package (zip)");

    let xml_names: Vec<String> = package
        .part_names()
        .filter(|n| n.to_lowercase().ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    progress.info(&format!("XML parts: {}", xml_names.len()));

    let mut parts: HashMap<String, XmlNode> = HashMap::new();
    let mut standalone: HashMap<String, Option<bool>> = HashMap::new();

    for (i, name) in xml_names.iter().enumerate() {
        let bytes = package.read_part(name).ok_or_else(|| DocError::DocxParse(format!("missing part {name}")))?;
        let part = parse_xml_part(name, bytes)?;
        standalone.insert(name.clone(), part.standalone);
        parts.insert(name.clone(), part.tree);
        progress.progress("Parsing XML", i + 1, xml_names.len());
    }

    let mut baseline_hash: HashMap<String, String> = HashMap::new();
    for (i, (name, root)) in parts.iter().enumerate() {
        baseline_hash.insert(name.clone(), structure_hash(root, &text_qnames(), &attr_qnames(), Some(&attr_pairs())));
        progress.progress("Hashing structure", i + 1, parts.len());
    }

    progress.info("Extracting translation units");
    let mut tus: Vec<TranslationUnit> = Vec::new();
    let mut next_tu_id = 1u32;
    let mut part_names_sorted: Vec<&String> = parts.keys().collect();
    part_names_sorted.sort();
    for (i, part_name) in part_names_sorted.iter().enumerate() {
        let root = &parts[*part_name];
        for scope in extract_scopes_from_xml(part_name, root) {
            if scope.surface_text.trim().is_empty() {
                continue;
            }
            let freeze = freeze_text(&scope.surface_text);
            tus.push(TranslationUnit::new(
                next_tu_id,
                (*part_name).clone(),
                scope.scope_key,
                scope.atoms,
                scope.spans,
                scope.surface_text,
                freeze.text,
                freeze.nt_map,
            ));
            next_tu_id += 1;
        }
        progress.progress("Scanning XML", i + 1, part_names_sorted.len());
    }

    if tus.is_empty() {
        progress.info("No translatable text found; writing output as-is");
        package.write(output_path, &HashMap::new())?;
        return Ok(());
    }

    if settings.max_tus > 0 {
        tus.truncate(settings.max_tus as usize);
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tu in &tus {
        *counts.entry(tu.scope_type()).or_default() += 1;
    }
    let mut count_parts: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
    count_parts.sort();
    progress.info(&format!("TU breakdown: {}", count_parts.join(", ")));

    for tu in tus.iter().take(8) {
        progress.info(&format!(
            "TU#{} type={} part={} spans={} chars={} nt={} text={}",
            tu.tu_id,
            tu.scope_type(),
            tu.part_name,
            tu.spans.len(),
            tu.source_surface.chars().count(),
            tu.nt_map.len(),
            preview_for_log(&tu.source_surface, settings.log_tu_max_chars)
        ));
    }

    let styles_root = parts.get("word/styles.xml");
    let para_contexts: Option<HashMap<u32, ParagraphContext>> = {
        let contexts = build_paragraph_contexts(&tus, styles_root, &parts);
        if contexts.is_empty() {
            None
        } else {
            Some(contexts)
        }
    };

    if let Some(ctxs) = &para_contexts {
        let headings = ctxs.values().filter(|c| c.is_heading).count();
        let list_paragraphs = ctxs.values().filter(|c| c.list_level.is_some()).count();
        let in_table = ctxs.values().filter(|c| c.in_table).count();
        progress.info(&format!(
            "Hierarchy: paragraphs={} headings={headings} list_paragraphs={list_paragraphs} in_table={in_table}",
            ctxs.len()
        ));
    }

    let forced_src = settings.source_lang_code.as_deref().unwrap_or("").trim().to_string();
    let forced_tgt = settings.target_lang_code.as_deref().unwrap_or("").trim().to_string();
    let (source_lang, target_lang): (String, String) = if !forced_src.is_empty() && !forced_tgt.is_empty() {
        progress.info(&format!("Language forced: {forced_src} -> {forced_tgt}"));
        (forced_src, forced_tgt)
    } else {
        match detect_language_pair_from_tus(&tus) {
            None => {
                progress.info("Auto language detect: no signal; skipping translation and writing output as-is");
                package.write(output_path, &HashMap::new())?;
                return Ok(());
            }
            Some((src, tgt, detail)) => {
                progress.info(&detail);
                progress.info(&format!("Language: {src} -> {tgt}"));
                (src.to_string(), tgt.to_string())
            }
        }
    };

    let changed = rewrite_nt_maps_for_target_lang(&mut tus, &source_lang, &target_lang);
    if changed > 0 {
        progress.info(&format!("Locked legal references (NT remap): {changed}"));
    }

    progress.info(&format!("Translation units: {}", tus.len()));
    progress.info(&format!(
        "Config: agent={} decision_min_chars={} glossary_per_tu={} checkpoint_every={} heartbeat={}s log_tu_every={}",
        if settings.enable_decision { "on" } else { "off" },
        settings.decision_min_chars,
        settings.glossary_max_items_per_tu,
        settings.checkpoint_every,
        settings.heartbeat_seconds,
        settings.log_tu_every
    ));

    let mut checkpoint = CheckpointWriter::new(&package, output_path, settings.checkpoint_every);
    let mut current_modified: HashSet<String> = HashSet::new();

    crate::driver::translate_units(
        progress,
        translate_model,
        agent_model,
        &mut tus,
        &source_lang,
        &target_lang,
        ctx,
        para_contexts.as_ref(),
        settings.enable_decision,
        settings.decision_min_chars,
        settings.heartbeat_seconds,
        settings.max_input_tokens,
        settings.max_new_tokens,
        settings.glossary_max_items_per_tu,
        settings.log_tu_every,
        Some(&mut |tu: &TranslationUnit, idx: usize, total: usize| {
            if let Err(err) = apply_tu_translation(&mut parts, tu, &mut current_modified) {
                progress.info(&format!("Checkpoint apply failed TU#{}: {err}", tu.tu_id));
                return;
            }
            for name in &current_modified {
                checkpoint.mark_modified(name);
            }
            if let Err(err) = checkpoint.maybe_write(
                progress,
                idx,
                total,
                "translate",
                &|name| {
                    let root = &parts[name];
                    Ok(serialize_xml_part(&XmlPart {
                        name: name.to_string(),
                        tree: root.clone(),
                        standalone: standalone.get(name).copied().flatten(),
                    }))
                },
                &baseline_hash,
                &|name| structure_hash(&parts[name], &text_qnames(), &attr_qnames(), Some(&attr_pairs())),
            ) {
                progress.info(&format!("Checkpoint write failed: {err}"));
            }
        }),
    );

    final_review_and_repair(
        progress,
        agent_model,
        &mut tus,
        &source_lang,
        &target_lang,
        ctx,
        para_contexts.as_ref(),
        settings.decision_min_chars,
        settings.glossary_max_items_per_tu,
        settings.max_new_tokens,
        settings.hard_failure_repair_rounds,
        settings.log_tu_every,
        Some(&mut |tu: &TranslationUnit| {
            if let Err(err) = apply_tu_translation(&mut parts, tu, &mut current_modified) {
                progress.info(&format!("Checkpoint apply failed (review) TU#{}: {err}", tu.tu_id));
            }
        }),
    );

    let failures = scan_hard_failures(&tus, &source_lang, &target_lang, ctx);
    if !failures.is_empty() {
        progress.info(&format!("Validation still reports hard failures: {} (writing best-effort output)", failures.len()));
        for item in failures.iter().take(12) {
            progress.info(&format!(
                "  - TU#{} issues={} protocol={}",
                item.tu_id,
                hard_issues(&item.issues).iter().take(6).cloned().collect::<Vec<_>>().join(","),
                item.protocol_error.as_deref().unwrap_or("(none)")
            ));
        }
    }

    progress.info("Projecting translations back into XML (format-preserving)");
    let mut modified_parts: HashSet<String> = HashSet::new();
    let total = tus.len();
    for (i, tu) in tus.iter().enumerate() {
        apply_tu_translation(&mut parts, tu, &mut modified_parts)?;
        if i + 1 == total || (i + 1) % 50 == 0 {
            progress.progress("Writing text nodes", i + 1, total);
        }
    }

    progress.info("Verifying non-text structure unchanged");
    let replacements = verify_and_serialize(&parts, &modified_parts, &baseline_hash, &standalone)?;

    progress.info("Writing output DOCX");
    if output_path.exists() {
        progress.info(&format!("Overwriting existing output: {}", output_path.display()));
    }
    package.write(output_path, &replacements)?;
    progress.info(&format!("Done: {}", output_path.display()));

    Ok(())
}
