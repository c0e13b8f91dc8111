//! Document hierarchy context: style resolution, heading detection, and
//! the running section-path stack a translation unit sits under (§4.4).
//!
//! Unlike the reference implementation, which walks live `lxml` parent
//! pointers from a held element handle, this module re-locates each `w:p`
//! by parsing the root-relative path already embedded in its `scope_key`
//! (`part_name#w:p@1.2.0` -> `[1, 2, 0]`) and resolving it against the
//! part's parsed tree. Table-cell membership is then a prefix-of-path
//! ancestor check rather than a parent walk.

use crate::ir::TranslationUnit;
use crate::package::{find_all_by_tag, find_child_by_tag, node_at_path, XmlNode};
use crate::sentinels::any_sentinel;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn heading_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:Heading|标题)\s*(\d+)$").unwrap())
}

fn heading_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:Heading|标题)(\d+)").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleInfo {
    pub style_id: String,
    pub name: Option<String>,
    pub outline_level: Option<i32>,
    pub based_on: Option<String>,
}

/// Everything downstream prompting and review need to know about the
/// paragraph a translation unit came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphContext {
    pub part_name: String,
    pub scope_key: String,
    pub section_path: Vec<String>,
    pub is_heading: bool,
    pub heading_level: Option<i32>,
    pub style_id: Option<String>,
    pub style_name: Option<String>,
    pub outline_level: Option<i32>,
    pub num_id: Option<String>,
    pub list_level: Option<i32>,
    pub in_table: bool,
}

impl ParagraphContext {
    pub fn format_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        if !self.section_path.is_empty() {
            lines.push(format!("Section path: {}", self.section_path.join(" > ")));
        }
        if self.is_heading {
            if let Some(level) = self.heading_level {
                lines.push(format!("Paragraph role: Heading(level={level})"));
            }
        }
        if self.style_name.is_some() || self.style_id.is_some() {
            let label = self.style_name.as_deref().or(self.style_id.as_deref()).unwrap_or("");
            lines.push(format!("Paragraph style: {}", label.trim()));
        }
        if let Some(outline) = self.outline_level {
            lines.push(format!("Outline level: {outline}"));
        }
        if self.num_id.is_some() || self.list_level.is_some() {
            let num_id = self.num_id.as_deref().unwrap_or("");
            let ilvl = self.list_level.map(|v| v.to_string()).unwrap_or_default();
            lines.push(format!("List: numId={num_id} ilvl={ilvl}"));
        }
        if self.in_table {
            lines.push("In table: yes".to_string());
        }
        lines.join("\n")
    }
}

fn clean_text(text: &str, max_chars: usize) -> String {
    let stripped = any_sentinel().replace_all(text, " ");
    let collapsed = whitespace_re().replace_all(stripped.trim(), " ").trim().to_string();
    if max_chars > 0 && collapsed.chars().count() > max_chars {
        let truncated: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}

/// Extracts the root-relative child-index path embedded after `#w:p@` in
/// a scope key produced by `extract::extract_scopes_from_xml`.
fn w_paragraph_path(scope_key: &str) -> Option<Vec<usize>> {
    let idx = scope_key.find("#w:p@")?;
    let rest = &scope_key[idx + "#w:p@".len()..];
    rest.split('.').map(|s| s.parse::<usize>().ok()).collect()
}

fn is_ancestor_tc(root: &XmlNode, path: &[usize]) -> bool {
    let mut node = root;
    for &idx in path {
        if node.tag == "w:tc" {
            return true;
        }
        match node.child_at(idx) {
            Some(n) => node = n,
            None => return false,
        }
    }
    false
}

fn parse_styles(styles_root: Option<&XmlNode>) -> HashMap<String, StyleInfo> {
    let Some(root) = styles_root else { return HashMap::new() };
    let mut out = HashMap::new();
    for (_, style) in find_all_by_tag(root, "w:style") {
        let Some(sid) = style.attr("w:styleId").filter(|s| !s.is_empty()) else { continue };
        let name = find_child_by_tag(style, "w:name").and_then(|e| e.attr("w:val")).map(str::to_string);
        let based_on = find_child_by_tag(style, "w:basedOn").and_then(|e| e.attr("w:val")).map(str::to_string);
        let outline = find_all_by_tag(style, "w:pPr")
            .first()
            .and_then(|(_, ppr)| find_child_by_tag(ppr, "w:outlineLvl"))
            .and_then(|e| e.attr("w:val"))
            .and_then(|v| v.parse::<i32>().ok());
        out.insert(
            sid.to_string(),
            StyleInfo { style_id: sid.to_string(), name, outline_level: outline, based_on },
        );
    }
    out
}

fn resolve_style_outline(style_id: Option<&str>, styles: &HashMap<String, StyleInfo>) -> Option<i32> {
    let mut seen = std::collections::HashSet::new();
    let mut cur = style_id.map(str::to_string);
    while let Some(id) = cur {
        if !seen.insert(id.clone()) {
            break;
        }
        let Some(info) = styles.get(&id) else { break };
        if let Some(level) = info.outline_level {
            return Some(level);
        }
        cur = info.based_on.clone();
    }
    None
}

fn guess_heading_level(style_id: Option<&str>, style_name: Option<&str>, outline: Option<i32>) -> Option<i32> {
    if let Some(outline) = outline {
        return if outline >= 0 { Some(outline + 1) } else { None };
    }
    for cand in [style_name.unwrap_or(""), style_id.unwrap_or("")] {
        let trimmed = cand.trim();
        if let Some(caps) = heading_name_re().captures(trimmed) {
            if let Ok(n) = caps[1].parse::<i32>() {
                return Some(n);
            }
        }
        if let Some(caps) = heading_id_re().captures(cand) {
            if let Ok(n) = caps[1].parse::<i32>() {
                return Some(n);
            }
        }
    }
    None
}

struct ParagraphProps {
    style_id: Option<String>,
    outline: Option<i32>,
    num_id: Option<String>,
    ilvl: Option<i32>,
}

fn paragraph_props(p: &XmlNode) -> ParagraphProps {
    let mut props = ParagraphProps { style_id: None, outline: None, num_id: None, ilvl: None };
    let Some(ppr) = find_child_by_tag(p, "w:pPr") else { return props };

    props.style_id = find_child_by_tag(ppr, "w:pStyle").and_then(|e| e.attr("w:val")).map(str::to_string);
    props.outline = find_child_by_tag(ppr, "w:outlineLvl")
        .and_then(|e| e.attr("w:val"))
        .and_then(|v| v.parse::<i32>().ok());
    if let Some(numpr) = find_child_by_tag(ppr, "w:numPr") {
        props.num_id = find_child_by_tag(numpr, "w:numId").and_then(|e| e.attr("w:val")).map(str::to_string);
        props.ilvl = find_child_by_tag(numpr, "w:ilvl")
            .and_then(|e| e.attr("w:val"))
            .and_then(|v| v.parse::<i32>().ok());
    }
    props
}

/// Builds each word-processing-paragraph TU's [`ParagraphContext`],
/// including the running heading-stack-derived section path, scanning
/// each part's TUs in extraction order (document order) so the stack
/// reflects the document's actual heading nesting.
pub fn build_paragraph_contexts(
    tus: &[TranslationUnit],
    styles_root: Option<&XmlNode>,
    doc_roots: &HashMap<String, XmlNode>,
) -> HashMap<u32, ParagraphContext> {
    let styles = parse_styles(styles_root);

    let mut by_part: HashMap<&str, Vec<&TranslationUnit>> = HashMap::new();
    for tu in tus {
        if !tu.scope_key.contains("#w:p@") {
            continue;
        }
        by_part.entry(tu.part_name.as_str()).or_default().push(tu);
    }

    let mut result = HashMap::new();

    for (part_name, part_tus) in by_part {
        let Some(root) = doc_roots.get(part_name) else { continue };
        let mut heading_stack: Vec<(i32, String)> = Vec::new();

        for tu in part_tus {
            let Some(path) = w_paragraph_path(&tu.scope_key) else { continue };
            let Some(p) = node_at_path(root, &path) else { continue };

            let in_table = is_ancestor_tc(root, &path);
            let props = paragraph_props(p);

            let style_info = props.style_id.as_ref().and_then(|id| styles.get(id));
            let style_name = style_info.and_then(|s| s.name.clone());
            let outline = props.outline.or_else(|| resolve_style_outline(props.style_id.as_deref(), &styles));

            let heading_level = guess_heading_level(props.style_id.as_deref(), style_name.as_deref(), outline);
            let is_heading = heading_level.is_some();

            if let Some(level) = heading_level {
                let heading_text = clean_text(&tu.source_surface, 100);
                while heading_stack.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                    heading_stack.pop();
                }
                if !heading_text.is_empty() {
                    heading_stack.push((level, heading_text));
                }
            }

            let section_path: Vec<String> =
                heading_stack.iter().filter(|(_, t)| !t.is_empty()).map(|(_, t)| t.clone()).collect();

            result.insert(
                tu.tu_id,
                ParagraphContext {
                    part_name: tu.part_name.clone(),
                    scope_key: tu.scope_key.clone(),
                    section_path,
                    is_heading,
                    heading_level,
                    style_id: props.style_id,
                    style_name,
                    outline_level: outline,
                    num_id: props.num_id,
                    list_level: props.ilvl,
                    in_table,
                },
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::parse_xml_bytes;
    use std::collections::HashMap as Map;

    fn tu(tu_id: u32, part_name: &str, scope_key: &str, source: &str) -> TranslationUnit {
        TranslationUnit::new(
            tu_id,
            part_name.to_string(),
            scope_key.to_string(),
            Vec::new(),
            Vec::new(),
            source.to_string(),
            source.to_string(),
            Map::new(),
        )
    }

    #[test]
    fn detects_heading_via_style_name_and_pushes_section_path() {
        let doc = br#"<w:document xmlns:w="ns"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Intro</w:t></w:r></w:p>
            <w:p><w:r><w:t>Body text.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let root = parse_xml_bytes(doc).unwrap();

        let styles = br#"<w:styles xmlns:w="ns"><w:style w:styleId="Heading1"><w:name w:val="heading 1"/></w:style></w:styles>"#;
        let styles_root = parse_xml_bytes(styles).unwrap();

        let tus = vec![
            tu(1, "word/document.xml", "word/document.xml#w:p@1.0", "Intro"),
            tu(2, "word/document.xml", "word/document.xml#w:p@1.1", "Body text."),
        ];
        let mut doc_roots = Map::new();
        doc_roots.insert("word/document.xml".to_string(), root);

        let ctx = build_paragraph_contexts(&tus, Some(&styles_root), &doc_roots);
        assert!(ctx[&1].is_heading);
        assert_eq!(ctx[&1].heading_level, Some(1));
        assert_eq!(ctx[&2].section_path, vec!["Intro".to_string()]);
        assert!(!ctx[&2].is_heading);
    }

    #[test]
    fn detects_table_membership() {
        let doc = br#"<w:document xmlns:w="ns"><w:body>
            <w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
        </w:body></w:document>"#;
        let root = parse_xml_bytes(doc).unwrap();
        let tus = vec![tu(1, "word/document.xml", "word/document.xml#w:p@0.0.0.0", "Cell")];
        let mut doc_roots = Map::new();
        doc_roots.insert("word/document.xml".to_string(), root);

        let ctx = build_paragraph_contexts(&tus, None, &doc_roots);
        assert!(ctx[&1].in_table);
    }

    #[test]
    fn format_for_prompt_includes_section_and_style() {
        let ctx = ParagraphContext {
            part_name: "p".to_string(),
            scope_key: "k".to_string(),
            section_path: vec!["Chapter 1".to_string()],
            is_heading: false,
            heading_level: None,
            style_id: Some("Normal".to_string()),
            style_name: Some("Normal".to_string()),
            outline_level: None,
            num_id: None,
            list_level: None,
            in_table: false,
        };
        let out = ctx.format_for_prompt();
        assert!(out.contains("Section path: Chapter 1"));
        assert!(out.contains("Paragraph style: Normal"));
    }
}
