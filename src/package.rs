//! Package I/O: reading a `.docx` zip, parsing its XML parts into an owned
//! tree, and writing a structurally faithful copy back out (§4.1).
//!
//! The zip itself is copied entry-by-entry, preserving compression method,
//! timestamp, and permission bits for every part we don't touch, the way
//! the reference implementation's `write_docx` rebuilds the archive from
//! the original `ZipInfo` records rather than re-deriving them.

use crate::error::DocError;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::read::ZipArchive;
use zip::write::{FileOptions, ZipWriter};

/// One node in the owned XML tree. Attribute order is preserved so a part
/// that is never touched serializes back byte-for-byte equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlChild {
    Element(XmlNode),
    Text(String),
}

impl XmlNode {
    fn new(tag: String, attrs: Vec<(String, String)>) -> Self {
        Self { tag, attrs, children: Vec::new() }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
    }

    /// Concatenated text of direct `Text` children. Element text carriers
    /// in this grammar (`w:t`, `a:t`) hold exactly one such child in
    /// practice, but this sums all of them rather than assuming it.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlChild::Text(t) => Some(t.as_str()),
                XmlChild::Element(_) => None,
            })
            .collect()
    }

    /// Replaces all direct text content with a single `Text` child,
    /// preserving any element children and their relative order.
    pub fn set_text(&mut self, text: &str) {
        let elements: Vec<XmlChild> = self
            .children
            .drain(..)
            .filter(|c| matches!(c, XmlChild::Element(_)))
            .collect();
        if text.is_empty() && elements.is_empty() {
            return;
        }
        if !text.is_empty() {
            self.children.push(XmlChild::Text(text.to_string()));
        }
        self.children.extend(elements);
    }

    pub fn child_at(&self, index: usize) -> Option<&XmlNode> {
        match self.children.get(index) {
            Some(XmlChild::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn child_at_mut(&mut self, index: usize) -> Option<&mut XmlNode> {
        match self.children.get_mut(index) {
            Some(XmlChild::Element(e)) => Some(e),
            _ => None,
        }
    }
}

/// Collects every descendant element matching `tag`, in document order,
/// each paired with its root-relative path. Shared by `extract` and
/// `hierarchy`, which both need the lxml-`.findall(".//tag")` idiom over
/// the owned tree.
pub fn find_all_by_tag<'a>(root: &'a XmlNode, tag: &str) -> Vec<(Vec<usize>, &'a XmlNode)> {
    fn walk<'a>(node: &'a XmlNode, tag: &str, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, &'a XmlNode)>) {
        for (i, child) in node.children.iter().enumerate() {
            let XmlChild::Element(e) = child else { continue };
            path.push(i);
            if e.tag == tag {
                out.push((path.clone(), e));
            }
            walk(e, tag, path, out);
            path.pop();
        }
    }
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(root, tag, &mut path, &mut out);
    out
}

/// First direct child element named `tag`, mirroring `lxml`'s
/// `element.find(tag)` (immediate children only, no recursion).
pub fn find_child_by_tag<'a>(node: &'a XmlNode, tag: &str) -> Option<&'a XmlNode> {
    node.children.iter().find_map(|c| match c {
        XmlChild::Element(e) if e.tag == tag => Some(e),
        _ => None,
    })
}

/// Resolves a [`crate::ir::TextNodeRef::path`] to its element, walking
/// child indices from the part root.
pub fn node_at_path<'a>(root: &'a XmlNode, path: &[usize]) -> Option<&'a XmlNode> {
    let mut node = root;
    for &idx in path {
        node = node.child_at(idx)?;
    }
    Some(node)
}

/// Mutable counterpart of [`node_at_path`].
pub fn node_at_path_mut<'a>(root: &'a mut XmlNode, path: &[usize]) -> Option<&'a mut XmlNode> {
    let mut node = root;
    for &idx in path {
        node = node.child_at_mut(idx)?;
    }
    Some(node)
}

fn local_escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn local_escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_node(node: &XmlNode, out: &mut String) {
    out.push('<');
    out.push_str(&node.tag);
    for (k, v) in &node.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&local_escape_attr(v));
        out.push('"');
    }
    if node.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &node.children {
        match child {
            XmlChild::Text(t) => out.push_str(&local_escape_text(t)),
            XmlChild::Element(e) => write_node(e, out),
        }
    }
    out.push_str("</");
    out.push_str(&node.tag);
    out.push('>');
}

fn qname(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parses one XML part's bytes into an owned tree. Entities are never
/// resolved against external definitions (`quick_xml` does not fetch
/// DTDs), matching the reference parser's `resolve_entities=False`.
pub fn parse_xml_bytes(bytes: &[u8]) -> Result<XmlNode, DocError> {
    // Default reader config does not trim text nodes, which is what we
    // need: whitespace inside `w:t xml:space="preserve"` must round-trip
    // exactly.
    let mut reader = Reader::from_reader(bytes);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let mut attrs = Vec::new();
                for a in e.attributes() {
                    let a = a.map_err(|err| DocError::DocxParse(err.to_string()))?;
                    let key = qname(a.key.as_ref());
                    let value = a
                        .unescape_value()
                        .map_err(|err| DocError::DocxParse(err.to_string()))?
                        .into_owned();
                    attrs.push((key, value));
                }
                stack.push(XmlNode::new(qname(e.name().as_ref()), attrs));
            }
            Event::Empty(e) => {
                let mut attrs = Vec::new();
                for a in e.attributes() {
                    let a = a.map_err(|err| DocError::DocxParse(err.to_string()))?;
                    let key = qname(a.key.as_ref());
                    let value = a
                        .unescape_value()
                        .map_err(|err| DocError::DocxParse(err.to_string()))?
                        .into_owned();
                    attrs.push((key, value));
                }
                let node = XmlNode::new(qname(e.name().as_ref()), attrs);
                append_child(&mut stack, &mut root, XmlChild::Element(node));
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    DocError::DocxParse("unmatched closing tag".to_string())
                })?;
                append_child(&mut stack, &mut root, XmlChild::Element(node));
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|err| DocError::DocxParse(err.to_string()))?;
                if !text.is_empty() {
                    append_child(&mut stack, &mut root, XmlChild::Text(text.into_owned()));
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                append_child(&mut stack, &mut root, XmlChild::Text(text));
            }
            Event::Eof => break,
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
        }
    }

    root.ok_or_else(|| DocError::DocxParse("XML part has no root element".to_string()))
}

fn append_child(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, child: XmlChild) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(child);
    } else if let XmlChild::Element(e) = child {
        *root = Some(e);
    }
}

/// `standalone="yes"|"no"` from the part's XML declaration, or `None` if
/// absent. Only the first 200 bytes are inspected, matching the reference
/// implementation's shallow declaration sniff.
pub fn detect_standalone(xml_bytes: &[u8]) -> Option<bool> {
    let head_len = xml_bytes.len().min(200);
    let head = String::from_utf8_lossy(&xml_bytes[..head_len]);
    if !head.contains("standalone") {
        return None;
    }
    if head.contains("standalone=\"yes\"") || head.contains("standalone='yes'") {
        return Some(true);
    }
    if head.contains("standalone=\"no\"") || head.contains("standalone='no'") {
        return Some(false);
    }
    None
}

/// One parsed part: its tree plus enough of the original declaration to
/// reproduce it.
#[derive(Debug, Clone)]
pub struct XmlPart {
    pub name: String,
    pub tree: XmlNode,
    pub standalone: Option<bool>,
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> Result<XmlPart, DocError> {
    let tree = parse_xml_bytes(xml_bytes)
        .map_err(|e| DocError::DocxParse(format!("failed to parse XML part {name}: {e}")))?;
    Ok(XmlPart { name: name.to_string(), tree, standalone: detect_standalone(xml_bytes) })
}

/// Serializes a part back to bytes, reproducing the UTF-8 declaration with
/// the original `standalone` setting (or omitting the attribute when it
/// was absent, matching `lxml.etree.tostring(standalone=None)`).
pub fn serialize_xml_part(part: &XmlPart) -> Vec<u8> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"");
    match part.standalone {
        Some(true) => out.push_str(" standalone=\"yes\""),
        Some(false) => out.push_str(" standalone=\"no\""),
        None => {}
    }
    out.push_str("?>");
    write_node(&part.tree, &mut out);
    out.into_bytes()
}

fn canonicalize(
    node: &XmlNode,
    text_qnames: &HashSet<&str>,
    attr_qnames: &HashSet<&str>,
    attr_pairs: Option<&HashSet<(&str, &str)>>,
    out: &mut String,
) {
    out.push('<');
    out.push_str(&node.tag);
    let mut attrs: Vec<&(String, String)> = node
        .attrs
        .iter()
        .filter(|(k, _)| !attr_qnames.contains(k.as_str()))
        .collect();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in attrs {
        let value = if attr_pairs
            .map(|pairs| pairs.contains(&(node.tag.as_str(), k.as_str())))
            .unwrap_or(false)
        {
            ""
        } else {
            v.as_str()
        };
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&local_escape_attr(value));
        out.push('"');
    }
    out.push('>');
    if !text_qnames.contains(node.tag.as_str()) {
        for child in &node.children {
            match child {
                XmlChild::Text(t) => out.push_str(&local_escape_text(t)),
                XmlChild::Element(e) => canonicalize(e, text_qnames, attr_qnames, attr_pairs, out),
            }
        }
    }
    out.push_str("</");
    out.push_str(&node.tag);
    out.push('>');
}

/// Hashes a part's tree with translatable text and provenance attributes
/// blanked out, so the hash verifies structure survived projection without
/// being sensitive to the translation itself (§4.5/§4.13).
pub fn structure_hash(
    root: &XmlNode,
    text_qnames: &HashSet<&str>,
    attr_qnames: &HashSet<&str>,
    attr_pairs: Option<&HashSet<(&str, &str)>>,
) -> String {
    let mut canonical = String::new();
    canonicalize(root, text_qnames, attr_qnames, attr_pairs, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct ZipEntryMeta {
    compression: zip::CompressionMethod,
    last_modified: zip::DateTime,
    unix_mode: Option<u32>,
}

/// A read-open `.docx` archive: every entry's raw bytes plus enough zip
/// metadata to write an equivalent archive back out.
pub struct DocxPackage {
    order: Vec<String>,
    raw: HashMap<String, Vec<u8>>,
    meta: HashMap<String, ZipEntryMeta>,
}

impl DocxPackage {
    pub fn open(path: &Path) -> Result<Self, DocError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let mut order = Vec::with_capacity(archive.len());
        let mut raw = HashMap::with_capacity(archive.len());
        let mut meta = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            meta.insert(
                name.clone(),
                ZipEntryMeta {
                    compression: entry.compression(),
                    last_modified: entry.last_modified(),
                    unix_mode: entry.unix_mode(),
                },
            );
            order.push(name.clone());
            raw.insert(name, bytes);
        }

        Ok(Self { order, raw, meta })
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn read_part(&self, name: &str) -> Option<&[u8]> {
        self.raw.get(name).map(|v| v.as_slice())
    }

    /// Writes a new archive to `output_path`, substituting `replacements`
    /// for the parts they name and copying every other entry's bytes and
    /// zip metadata unchanged.
    pub fn write(&self, output_path: &Path, replacements: &HashMap<String, Vec<u8>>) -> Result<(), DocError> {
        let file = File::create(output_path)?;
        let mut writer = ZipWriter::new(file);

        for name in &self.order {
            let meta = &self.meta[name];
            let mut options: FileOptions = FileOptions::default()
                .compression_method(meta.compression)
                .last_modified_time(meta.last_modified);
            if let Some(mode) = meta.unix_mode {
                options = options.unix_permissions(mode);
            }
            writer.start_file(name.as_str(), options)?;
            let data = replacements.get(name).unwrap_or(&self.raw[name]);
            writer.write_all(data)?;
        }

        writer.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> &'static [u8] {
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:t xml:space="preserve">Hello &amp; welcome</w:t></w:r></w:p></w:body></w:document>"#
    }

    #[test]
    fn parses_and_reports_standalone() {
        let part = parse_xml_part("word/document.xml", sample_bytes()).unwrap();
        assert_eq!(part.standalone, Some(true));
        assert_eq!(part.tree.tag, "w:document");
    }

    #[test]
    fn round_trips_text_through_path_lookup() {
        let mut part = parse_xml_part("word/document.xml", sample_bytes()).unwrap();
        let path = [0, 0, 0];
        let node = node_at_path(&part.tree, &path).unwrap();
        assert_eq!(node.tag, "w:t");
        assert_eq!(node.text(), "Hello & welcome");

        let node_mut = node_at_path_mut(&mut part.tree, &path).unwrap();
        node_mut.set_text("你好");
        assert_eq!(node_at_path(&part.tree, &path).unwrap().text(), "你好");

        let out = serialize_xml_part(&part);
        let out_str = String::from_utf8(out).unwrap();
        assert!(out_str.contains("你好"));
        assert!(out_str.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"));
    }

    #[test]
    fn escapes_text_and_attributes_on_write() {
        let mut attrs = Vec::new();
        attrs.push(("w:val".to_string(), "a & b \"q\"".to_string()));
        let mut node = XmlNode::new("w:t".to_string(), attrs);
        node.set_text("<tag> & stuff");
        let part = XmlPart { name: "x".to_string(), tree: node, standalone: None };
        let out = String::from_utf8(serialize_xml_part(&part)).unwrap();
        assert!(out.contains("&lt;tag&gt; &amp; stuff"));
        assert!(out.contains("a &amp; b &quot;q&quot;"));
        assert!(!out.contains("standalone"));
    }

    #[test]
    fn structure_hash_ignores_blanked_text_and_attrs() {
        let part_a = parse_xml_part("p", sample_bytes()).unwrap();
        let modified = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:t xml:space="preserve">Different text entirely</w:t></w:r></w:p></w:body></w:document>"#;
        let part_b = parse_xml_part("p", modified).unwrap();

        let text_qnames: HashSet<&str> = ["w:t"].into_iter().collect();
        let attr_qnames: HashSet<&str> = HashSet::new();
        let hash_a = structure_hash(&part_a.tree, &text_qnames, &attr_qnames, None);
        let hash_b = structure_hash(&part_b.tree, &text_qnames, &attr_qnames, None);
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn structure_hash_detects_structural_change() {
        let part_a = parse_xml_part("p", sample_bytes()).unwrap();
        let modified = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="ns"><w:body><w:p><w:r><w:r><w:t xml:space="preserve">Hello &amp; welcome</w:t></w:r></w:r></w:p></w:body></w:document>"#;
        let part_b = parse_xml_part("p", modified).unwrap();

        let text_qnames: HashSet<&str> = ["w:t"].into_iter().collect();
        let attr_qnames: HashSet<&str> = HashSet::new();
        let hash_a = structure_hash(&part_a.tree, &text_qnames, &attr_qnames, None);
        let hash_b = structure_hash(&part_b.tree, &text_qnames, &attr_qnames, None);
        assert_ne!(hash_a, hash_b);
    }
}
