// CLI smoke tests driven through a PTY with rexpect
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use rexpect::spawn;
use std::path::Path;
use tempfile::TempDir;

const TIMEOUT_MS: u64 = 20000;
const BIN: &str = env!("CARGO_BIN_EXE_chonker-harvest");

fn write_sample_pdf(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Harvest smoke test https://smoke.example")]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// `None` when no PTY can be opened here (some CI sandboxes).
fn spawn_cli(args: &str) -> Option<rexpect::session::PtySession> {
    match spawn(&format!("{} {}", BIN, args), Some(TIMEOUT_MS)) {
        Ok(session) => Some(session),
        Err(e) => {
            eprintln!("skipping: cannot spawn {}: {}", BIN, e);
            None
        }
    }
}

#[test]
fn test_help_lists_flags() {
    let Some(mut p) = spawn_cli("--help") else { return };
    p.exp_string("Extract text, hyperlinks and images from a PDF").unwrap();
    p.exp_string("--no-ocr").unwrap();
    p.exp_eof().unwrap();
}

#[test]
fn test_text_output() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("sample.pdf");
    write_sample_pdf(&pdf);

    let Some(mut p) = spawn_cli(&format!("{} --format text --no-ocr", pdf.display())) else {
        return;
    };
    p.exp_string("--- Extracted Text ---").unwrap();
    p.exp_string("Harvest smoke test").unwrap();
    p.exp_string("https://smoke.example").unwrap();
    p.exp_string("--- Images (0) ---").unwrap();
    p.exp_eof().unwrap();
}

#[test]
fn test_json_output() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("sample.pdf");
    write_sample_pdf(&pdf);

    let Some(mut p) = spawn_cli(&format!("{} --no-ocr", pdf.display())) else {
        return;
    };
    p.exp_string("\"hyperlinks\"").unwrap();
    p.exp_string("\"url\": \"https://smoke.example\"").unwrap();
    p.exp_eof().unwrap();
}

#[test]
fn test_missing_file_fails() {
    let Some(mut p) = spawn_cli("/nonexistent/definitely-missing.pdf") else {
        return;
    };
    p.exp_string("Failed to extract").unwrap();
    p.exp_string("IO error").unwrap();
    p.exp_eof().unwrap();
}
