//! Data model: atoms, format spans, and translation units (§3).
//!
//! These are pure data types with no parsing or projection behavior of
//! their own — `extract` builds them, `driver`/`review` mutate the
//! translation fields, and `project` consumes them.

use std::collections::HashMap;

/// Identifies one mutable text carrier in the XML tree.
///
/// Unlike the reference Python implementation (which holds a live `lxml`
/// element handle), this crate addresses a node by a path of child indices
/// from its part's root, resolved against the owned [`crate::package::XmlNode`]
/// tree at projection time. This keeps `TranslationUnit` free of lifetime
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNodeRef {
    pub part_name: String,
    pub kind: NodeKind,
    /// Path of child indices from the part's document root to this node.
    pub path: Vec<usize>,
    /// Set only when `kind` is `Attr`: the attribute local name (already
    /// namespace-prefixed, e.g. `w:val`).
    pub attr_name: Option<String>,
    pub original_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// `w:t` — a word-processing run's text element.
    WT,
    /// `a:t` — a drawing run's text element.
    AT,
    /// An attribute-valued text carrier (e.g. `w:lvlText/@w:val`).
    Attr,
}

/// An indivisible extraction unit within a paragraph-like scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomKind {
    Text,
    Tab,
    Br,
    Nbh,
    Shy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub kind: AtomKind,
    /// Present only for `Text` atoms.
    pub node_ref: Option<TextNodeRef>,
    pub value: String,
    /// Formatting signature; empty for control atoms.
    pub style_sig: String,
}

impl Atom {
    pub fn is_text(&self) -> bool {
        self.kind == AtomKind::Text
    }
}

/// A maximal run of contiguous `TEXT` atoms sharing an identical formatting
/// signature. The unit to which translated characters are reallocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpan {
    pub style_sig: String,
    pub node_refs: Vec<TextNodeRef>,
    pub source_text: String,
}

/// A paragraph-like scope: unique id, atom/span lists, surfaces, and
/// translation state. Mutated exclusively by the translation driver and
/// review/repair (translation fields + flags); serialized by the projector.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub tu_id: u32,
    pub part_name: String,
    pub scope_key: String,
    pub atoms: Vec<Atom>,
    pub spans: Vec<FormatSpan>,
    pub source_surface: String,
    pub frozen_surface: String,
    pub nt_map: HashMap<String, String>,
    pub draft_translation: Option<String>,
    pub final_translation: Option<String>,
    pub draft_translation_model: Option<String>,
    pub force_ape: bool,
    pub qe_flags: Vec<String>,
    /// 0-100 reviewer confidence score, set only when an agent review ran.
    pub qe_score: Option<u8>,
    /// Deterministic-normalizer whitespace-repair flags accumulated across
    /// the driver and review/repair passes.
    pub ws_flags: Vec<String>,
    pub protocol_error: Option<String>,
    pub skip_reason: Option<String>,
}

impl TranslationUnit {
    pub fn new(
        tu_id: u32,
        part_name: String,
        scope_key: String,
        atoms: Vec<Atom>,
        spans: Vec<FormatSpan>,
        source_surface: String,
        frozen_surface: String,
        nt_map: HashMap<String, String>,
    ) -> Self {
        Self {
            tu_id,
            part_name,
            scope_key,
            atoms,
            spans,
            source_surface,
            frozen_surface,
            nt_map,
            draft_translation: None,
            final_translation: None,
            draft_translation_model: None,
            force_ape: false,
            qe_flags: Vec::new(),
            qe_score: None,
            ws_flags: Vec::new(),
            protocol_error: None,
            skip_reason: None,
        }
    }

    /// The translation to project: the final translation if review/repair
    /// produced one, else the driver's draft.
    pub fn output_translation(&self) -> Option<&str> {
        self.final_translation
            .as_deref()
            .or(self.draft_translation.as_deref())
    }

    /// The `#w:p@`/`#a:p@`/`#w:lvlText@` scope type tag embedded in
    /// `scope_key`, for logging and breakdowns.
    pub fn scope_type(&self) -> &str {
        for tag in ["w:p", "a:p", "w:lvlText"] {
            if self.scope_key.contains(&format!("#{tag}@")) {
                return tag;
            }
        }
        "unknown"
    }
}
