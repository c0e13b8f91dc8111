//! Translatable-text extraction: walks parsed XML parts and builds
//! [`TranslationUnit`]-ready scopes with their atoms, format spans, and
//! surface text (§4.3).
//!
//! Works over the owned [`crate::package::XmlNode`] tree rather than live
//! `lxml` element handles, so paragraph identity (`id(p)` in the reference
//! implementation) is the node's root-relative child-index path instead of
//! an object address — stable, and deterministic across runs.

use crate::ir::{Atom, AtomKind, FormatSpan, NodeKind, TextNodeRef};
use crate::package::{find_all_by_tag, find_child_by_tag, XmlChild, XmlNode};
use crate::sentinels::{BR, NBH, SHY, TAB};

/// One paragraph-like scope pulled out of a part, before it becomes a
/// [`crate::ir::TranslationUnit`] (the driver assigns `tu_id`s and owns
/// translation state; this is the read-only extraction result).
#[derive(Debug, Clone)]
pub struct ScopeExtract {
    pub scope_key: String,
    pub atoms: Vec<Atom>,
    pub spans: Vec<FormatSpan>,
    pub surface_text: String,
}

fn path_key(path: &[usize]) -> String {
    path.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(".")
}

fn w_style_sig_for_run(run: Option<&XmlNode>) -> String {
    let Some(run) = run else { return "w:rPr()".to_string() };
    let Some(rpr) = find_child_by_tag(run, "w:rPr") else { return "w:rPr()".to_string() };

    let bool_prop = |tag: &str| -> &'static str {
        let Some(elem) = find_child_by_tag(rpr, tag) else { return "0" };
        match elem.attr("w:val") {
            None => "1",
            Some(v) if matches!(v, "0" | "false" | "off" | "none") => "0",
            Some(_) => "1",
        }
    };
    let val_prop = |tag: &str| -> String {
        find_child_by_tag(rpr, tag).and_then(|e| e.attr("w:val")).unwrap_or("").to_string()
    };

    let fonts_sig = match find_child_by_tag(rpr, "w:rFonts") {
        Some(fonts) => [
            fonts.attr("w:ascii").unwrap_or(""),
            fonts.attr("w:hAnsi").unwrap_or(""),
            fonts.attr("w:eastAsia").unwrap_or(""),
            fonts.attr("w:cs").unwrap_or(""),
        ]
        .join("|"),
        None => String::new(),
    };

    [
        format!("b={}", bool_prop("w:b")),
        format!("i={}", bool_prop("w:i")),
        format!("u={}", val_prop("w:u")),
        format!("strike={}", bool_prop("w:strike")),
        format!("color={}", val_prop("w:color")),
        format!("highlight={}", val_prop("w:highlight")),
        format!("sz={}", val_prop("w:sz")),
        format!("szCs={}", val_prop("w:szCs")),
        format!("rStyle={}", val_prop("w:rStyle")),
        format!("fonts={fonts_sig}"),
    ]
    .join("|")
}

fn a_style_sig_for_run(run: Option<&XmlNode>) -> String {
    let Some(run) = run else { return "a:rPr()".to_string() };
    let Some(rpr) = find_child_by_tag(run, "a:rPr") else { return "a:rPr()".to_string() };

    let mut parts: Vec<String> = ["b", "i", "u", "strike", "sz"]
        .iter()
        .map(|attr| format!("{attr}={}", rpr.attr(attr).unwrap_or("")))
        .collect();
    if let Some(latin) = find_child_by_tag(rpr, "a:latin") {
        parts.push(format!("typeface={}", latin.attr("typeface").unwrap_or("")));
    }
    parts.join("|")
}

/// Builds maximal same-style runs of contiguous `TEXT` atoms, flushing the
/// current run whenever a control atom is hit or the style signature
/// changes.
fn build_spans(atoms: &[Atom]) -> Vec<FormatSpan> {
    let mut spans = Vec::new();
    let mut current_style: Option<String> = None;
    let mut current_nodes: Vec<TextNodeRef> = Vec::new();
    let mut current_text = String::new();

    macro_rules! flush {
        () => {
            if !current_nodes.is_empty() {
                spans.push(FormatSpan {
                    style_sig: current_style.clone().unwrap_or_default(),
                    node_refs: std::mem::take(&mut current_nodes),
                    source_text: std::mem::take(&mut current_text),
                });
            }
            current_style = None;
        };
    }

    for atom in atoms {
        if !atom.is_text() {
            flush!();
            continue;
        }
        if current_style.as_deref() != Some(atom.style_sig.as_str()) {
            flush!();
            current_style = Some(atom.style_sig.clone());
        }
        let Some(node_ref) = &atom.node_ref else { continue };
        current_nodes.push(node_ref.clone());
        current_text.push_str(&atom.value);
    }
    flush!();
    spans
}

enum Carrier {
    Word,
    Drawing,
}

fn collect_paragraph_atoms(
    part_name: &str,
    carrier: &Carrier,
    node: &XmlNode,
    path: &mut Vec<usize>,
    current_run: Option<&XmlNode>,
    atoms: &mut Vec<Atom>,
) {
    let (t_tag, run_tag, tab_tag, br_tags, nbh_tag, shy_tag): (&str, &str, &str, &[&str], Option<&str>, Option<&str>) =
        match carrier {
            Carrier::Word => ("w:t", "w:r", "w:tab", &["w:br", "w:cr"], Some("w:noBreakHyphen"), Some("w:softHyphen")),
            Carrier::Drawing => ("a:t", "a:r", "a:tab", &["a:br"], None, None),
        };

    for (i, child) in node.children.iter().enumerate() {
        let XmlChild::Element(e) = child else { continue };
        path.push(i);
        let next_run = if e.tag == run_tag { Some(e) } else { current_run };

        if e.tag == t_tag {
            let text = e.text();
            let style_sig = match carrier {
                Carrier::Word => w_style_sig_for_run(next_run),
                Carrier::Drawing => a_style_sig_for_run(next_run),
            };
            let node_ref = TextNodeRef {
                part_name: part_name.to_string(),
                kind: if matches!(carrier, Carrier::Word) { NodeKind::WT } else { NodeKind::AT },
                path: path.clone(),
                attr_name: None,
                original_text: text.clone(),
            };
            atoms.push(Atom { kind: AtomKind::Text, node_ref: Some(node_ref), value: text, style_sig });
        } else if e.tag == tab_tag {
            atoms.push(Atom { kind: AtomKind::Tab, node_ref: None, value: TAB.to_string(), style_sig: String::new() });
        } else if br_tags.contains(&e.tag.as_str()) {
            atoms.push(Atom { kind: AtomKind::Br, node_ref: None, value: BR.to_string(), style_sig: String::new() });
        } else if nbh_tag == Some(e.tag.as_str()) {
            atoms.push(Atom { kind: AtomKind::Nbh, node_ref: None, value: NBH.to_string(), style_sig: String::new() });
        } else if shy_tag == Some(e.tag.as_str()) {
            atoms.push(Atom { kind: AtomKind::Shy, node_ref: None, value: SHY.to_string(), style_sig: String::new() });
        }

        collect_paragraph_atoms(part_name, carrier, e, path, next_run, atoms);
        path.pop();
    }
}

fn extract_run_scopes(part_name: &str, root: &XmlNode, carrier: Carrier, tag: &str, label: &str) -> Vec<ScopeExtract> {
    let paths = find_all_by_tag(root, tag);

    let mut scopes = Vec::new();
    for (p_path, p_node) in paths {
        let scope_key = format!("{part_name}#{label}@{}", path_key(&p_path));
        let mut atoms = Vec::new();
        let mut walk_path = p_path.clone();
        collect_paragraph_atoms(part_name, &carrier, p_node, &mut walk_path, None, &mut atoms);

        let has_nonblank_text = atoms.iter().any(|a| a.is_text() && !a.value.trim().is_empty());
        if !has_nonblank_text {
            continue;
        }

        let spans = build_spans(&atoms);
        let surface_text = atoms.iter().map(|a| a.value.as_str()).collect::<String>();
        scopes.push(ScopeExtract { scope_key, atoms, spans, surface_text });
    }
    scopes
}

fn extract_lvl_text_scopes(part_name: &str, root: &XmlNode) -> Vec<ScopeExtract> {
    let paths = find_all_by_tag(root, "w:lvlText");

    let mut scopes = Vec::new();
    for (path, node) in paths {
        let Some(val_attr) = node.attr("w:val") else { continue };
        if val_attr.trim().is_empty() {
            continue;
        }
        let val_attr = val_attr.to_string();
        let scope_key = format!("{part_name}#w:lvlText@{}", path_key(&path));
        let node_ref = TextNodeRef {
            part_name: part_name.to_string(),
            kind: NodeKind::Attr,
            path,
            attr_name: Some("w:val".to_string()),
            original_text: val_attr.clone(),
        };
        let atom = Atom {
            kind: AtomKind::Text,
            node_ref: Some(node_ref.clone()),
            value: val_attr.clone(),
            style_sig: "attr".to_string(),
        };
        let span = FormatSpan { style_sig: "attr".to_string(), node_refs: vec![node_ref], source_text: val_attr.clone() };
        scopes.push(ScopeExtract {
            scope_key,
            atoms: vec![atom],
            spans: vec![span],
            surface_text: val_attr,
        });
    }
    scopes
}

/// Extracts every translatable scope from one parsed part: word-processing
/// paragraphs, drawing-text paragraphs, and numbering level-text
/// attributes, in that order (matching the reference implementation's
/// scan order).
pub fn extract_scopes_from_xml(part_name: &str, root: &XmlNode) -> Vec<ScopeExtract> {
    let mut scopes = extract_run_scopes(part_name, root, Carrier::Word, "w:p", "w:p");
    scopes.extend(extract_run_scopes(part_name, root, Carrier::Drawing, "a:p", "a:p"));
    scopes.extend(extract_lvl_text_scopes(part_name, root));
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::parse_xml_bytes;

    #[test]
    fn extracts_plain_paragraph_text_and_one_span() {
        let xml = br#"<w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>Hello</w:t></w:r></w:p></w:body></w:document>"#;
        let root = parse_xml_bytes(xml).unwrap();
        let scopes = extract_scopes_from_xml("word/document.xml", &root);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].surface_text, "Hello");
        assert_eq!(scopes[0].spans.len(), 1);
    }

    #[test]
    fn splits_spans_on_style_change_and_keeps_control_atoms_out_of_surface_breaks() {
        let xml = br#"<w:document xmlns:w="ns"><w:body><w:p>
            <w:r><w:rPr><w:b/></w:rPr><w:t>Bold</w:t></w:r>
            <w:r><w:tab/></w:r>
            <w:r><w:t>Plain</w:t></w:r>
        </w:p></w:body></w:document>"#;
        let root = parse_xml_bytes(xml).unwrap();
        let scopes = extract_scopes_from_xml("word/document.xml", &root);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].surface_text, format!("Bold{TAB}Plain"));
        assert_eq!(scopes[0].spans.len(), 2);
        assert!(scopes[0].spans[0].style_sig.contains("b=1"));
        assert!(scopes[0].spans[1].style_sig.contains("b=0"));
    }

    #[test]
    fn blank_only_paragraph_is_skipped() {
        let xml = br#"<w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>   </w:t></w:r></w:p></w:body></w:document>"#;
        let root = parse_xml_bytes(xml).unwrap();
        let scopes = extract_scopes_from_xml("word/document.xml", &root);
        assert!(scopes.is_empty());
    }

    #[test]
    fn extracts_numbering_level_text() {
        let xml = br#"<w:numbering xmlns:w="ns"><w:abstractNum><w:lvl><w:lvlText w:val="%1."/></w:lvl></w:abstractNum></w:numbering>"#;
        let root = parse_xml_bytes(xml).unwrap();
        let scopes = extract_scopes_from_xml("word/numbering.xml", &root);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].surface_text, "%1.");
        assert_eq!(scopes[0].atoms[0].node_ref.as_ref().unwrap().attr_name.as_deref(), Some("w:val"));
    }

    #[test]
    fn drawing_paragraph_text_is_extracted() {
        let xml = br#"<w:document xmlns:w="ns" xmlns:a="ns2"><w:body><w:drawing><a:p><a:r><a:t>Shape text</a:t></a:r></a:p></w:drawing></w:body></w:document>"#;
        let root = parse_xml_bytes(xml).unwrap();
        let scopes = extract_scopes_from_xml("word/document.xml", &root);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].surface_text, "Shape text");
    }
}
