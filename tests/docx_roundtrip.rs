//! End-to-end scenarios (spec §8): a synthetic minimal .docx goes in, a
//! translated .docx with identical non-text structure comes out.

use doctranslate::config::Settings;
use doctranslate::models::{AgentContext, TranslateContext, TranslateModel};
use doctranslate::package::DocxPackage;
use doctranslate::progress::NullProgress;
use doctranslate::DocError;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use zip::write::{FileOptions, ZipWriter};

const CONTENT_TYPES: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn document_xml(first: &str, second: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t xml:space="preserve">{first}</w:t></w:r></w:p><w:p><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{second}</w:t></w:r></w:p></w:body></w:document>"#
    )
    .into_bytes()
}

fn build_docx(path: &Path, document: &[u8]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let options: FileOptions = FileOptions::default();

    writer.start_file("[Content_Types].xml", options).unwrap();
    writer.write_all(CONTENT_TYPES).unwrap();

    writer.start_file("_rels/.rels", options).unwrap();
    writer.write_all(ROOT_RELS).unwrap();

    writer.start_file("word/document.xml", options).unwrap();
    writer.write_all(document).unwrap();

    writer.finish().unwrap();
}

/// Uppercases the source text so the test can tell translation actually ran,
/// while preserving every sentinel token untouched (`decode_from_model`
/// round-trips uppercase-only ASCII sentinels fine since they're untouched
/// substrings, not re-typed).
struct UppercaseModel;

impl TranslateModel for UppercaseModel {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        _target_lang: &str,
        _max_new_tokens: usize,
        _ctx: &TranslateContext,
    ) -> Result<String, DocError> {
        Ok(text.to_uppercase())
    }
}

fn base_settings() -> Settings {
    let mut settings = Settings::from_env();
    settings.source_lang_code = Some("en".to_string());
    settings.target_lang_code = Some("zh".to_string());
    settings.checkpoint_every = 0;
    settings.enable_decision = false;
    settings
}

#[test]
fn translate_file_preserves_structure_and_updates_text() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.docx");
    let output = dir.path().join("out.docx");
    build_docx(
        &input,
        &document_xml(
            "This is the first paragraph of a sample document.",
            "Here is a second paragraph with bold text for translation.",
        ),
    );

    let settings = base_settings();
    let model = UppercaseModel;
    let ctx = AgentContext::default();

    doctranslate::translate_file(&NullProgress, &settings, &model, None, &ctx, &input, &output)
        .expect("translation should succeed");

    assert!(output.exists());

    let package = DocxPackage::open(&output).unwrap();
    let bytes = package.read_part("word/document.xml").unwrap();
    let text = String::from_utf8_lossy(bytes);
    assert!(text.contains("THIS IS THE FIRST PARAGRAPH"));
    assert!(text.contains("HERE IS A SECOND PARAGRAPH"));
    // Bold run property must survive untouched.
    assert!(text.contains("<w:b/>"));
    assert!(text.contains("xml:space=\"preserve\""));

    // Every other part copied through unchanged.
    let content_types = package.read_part("[Content_Types].xml").unwrap();
    assert_eq!(content_types, CONTENT_TYPES);
}

#[test]
fn translate_file_is_a_noop_when_no_translatable_text() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.docx");
    let output = dir.path().join("out.docx");
    build_docx(&input, &document_xml("", ""));

    let settings = base_settings();
    let model = UppercaseModel;
    let ctx = AgentContext::default();

    doctranslate::translate_file(&NullProgress, &settings, &model, None, &ctx, &input, &output)
        .expect("empty document should not error");

    let package = DocxPackage::open(&output).unwrap();
    let bytes = package.read_part("word/document.xml").unwrap();
    assert_eq!(bytes, document_xml("", "").as_slice());
}

#[test]
fn translate_file_rejects_a_missing_input_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.docx");
    let output = dir.path().join("out.docx");

    let settings = base_settings();
    let model = UppercaseModel;
    let ctx = AgentContext::default();

    let err = doctranslate::translate_file(&NullProgress, &settings, &model, None, &ctx, &missing, &output)
        .unwrap_err();
    assert!(matches!(err, DocError::Io(_)));
}
