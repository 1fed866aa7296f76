use std::fs;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde_json::json;
use snapocr_engine::{ExportFormat, ExportRequest, Exporter, FileExporter, LayoutBlock, OcrDocument};
use tempfile::TempDir;

fn request(dir: &TempDir, document: OcrDocument, format: ExportFormat) -> ExportRequest {
    ExportRequest::from_document(
        PathBuf::from("/scans/receipt.png"),
        dir.path().to_path_buf(),
        "receipt".to_string(),
        document,
        format,
    )
}

fn lines(lines: &[&str]) -> OcrDocument {
    OcrDocument {
        lines: lines.iter().map(|l| l.to_string()).collect(),
        raw: json!({ "ocrResults": [] }),
        ..OcrDocument::default()
    }
}

#[test]
fn txt_export_writes_plain_text() {
    let dir = TempDir::new().unwrap();
    let status = FileExporter::new().export(&request(&dir, lines(&["a", "b"]), ExportFormat::Txt));
    assert_eq!(status, "exported: receipt.txt");
    assert_eq!(
        fs::read_to_string(dir.path().join("receipt.txt")).unwrap(),
        "a\nb"
    );
}

#[test]
fn json_export_carries_file_text_and_raw() {
    let dir = TempDir::new().unwrap();
    FileExporter::new().export(&request(&dir, lines(&["total 12"]), ExportFormat::Json));
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("receipt.json")).unwrap())
            .unwrap();
    assert_eq!(
        written,
        json!({
            "file": "receipt.png",
            "text": "total 12",
            "raw_result": { "ocrResults": [] }
        })
    );
}

#[test]
fn markdown_export_adds_heading_unless_present() {
    let dir = TempDir::new().unwrap();
    FileExporter::new().export(&request(&dir, lines(&["body"]), ExportFormat::Markdown));
    assert_eq!(
        fs::read_to_string(dir.path().join("receipt.md")).unwrap(),
        "# receipt\n\nbody\n"
    );

    let document = OcrDocument {
        markdown: "## Invoice\n\n| a | b |\n|---|---|\n| 1 | 2 |".to_string(),
        ..OcrDocument::default()
    };
    FileExporter::new().export(&request(&dir, document, ExportFormat::Markdown));
    assert!(fs::read_to_string(dir.path().join("receipt.md"))
        .unwrap()
        .starts_with("## Invoice"));
}

#[test]
fn docx_and_pdf_fall_back_to_markdown() {
    let dir = TempDir::new().unwrap();
    let status = FileExporter::new().export(&request(&dir, lines(&["x"]), ExportFormat::Docx));
    assert_eq!(
        status,
        "DOCX renderer not bundled; exported markdown instead: receipt.md"
    );
    assert!(dir.path().join("receipt.md").exists());

    let status = FileExporter::new().export(&request(&dir, lines(&["x"]), ExportFormat::Pdf));
    assert!(status.starts_with("PDF renderer not bundled"));
}

#[test]
fn html_export_prefers_tables() {
    let dir = TempDir::new().unwrap();
    let document = OcrDocument {
        markdown: "ignored".to_string(),
        tables_html: vec!["<table><tr><td>1</td></tr></table>".to_string()],
        ..OcrDocument::default()
    };
    FileExporter::new().export(&request(&dir, document, ExportFormat::Html));
    let html = fs::read_to_string(dir.path().join("receipt.html")).unwrap();
    assert!(html.contains("<table><tr><td>1</td></tr></table>"));
    assert!(!html.contains("ignored"));

    FileExporter::new().export(&request(&dir, lines(&["<b>tag</b>"]), ExportFormat::Html));
    let html = fs::read_to_string(dir.path().join("receipt.html")).unwrap();
    assert!(html.contains("<p>&lt;b&gt;tag&lt;/b&gt;</p>"));
}

#[test]
fn csv_export_keeps_text_line_numbers_for_non_empty_lines() {
    let dir = TempDir::new().unwrap();
    FileExporter::new().export(&request(&dir, lines(&["a", "", "b,c"]), ExportFormat::Csv));
    assert_eq!(
        fs::read_to_string(dir.path().join("receipt.csv")).unwrap(),
        "line,text\n1,a\n3,\"b,c\"\n"
    );
}

#[test]
fn xlsx_export_writes_a_workbook() {
    let dir = TempDir::new().unwrap();
    let document = OcrDocument {
        tables_html: vec![
            "<table><tr><th colspan=\"2\">Items</th></tr><tr><td>tea</td><td>3</td></tr></table>"
                .to_string(),
        ],
        ..OcrDocument::default()
    };
    let status = FileExporter::new().export(&request(&dir, document, ExportFormat::Xlsx));
    assert_eq!(status, "exported: receipt.xlsx");
    let bytes = fs::read(dir.path().join("receipt.xlsx")).unwrap();
    assert_eq!(&bytes[..2], b"PK");
}

#[test]
fn layout_export_lists_blocks() {
    let dir = TempDir::new().unwrap();
    let document = OcrDocument {
        lines: vec!["Title".to_string()],
        layout: vec![LayoutBlock {
            label: "doc_title".to_string(),
            content: "Title".to_string(),
            bbox: Some(vec![1.0, 2.0, 3.0, 4.0]),
            order: Some(1),
        }],
        ..OcrDocument::default()
    };
    FileExporter::new().export(&request(&dir, document, ExportFormat::Layout));
    let written: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("receipt.layout.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written["layout"][0]["label"], "doc_title");
    assert_eq!(written["layout"][0]["order"], 1);
}

#[test]
fn code_and_latex_exports_use_their_extensions() {
    let dir = TempDir::new().unwrap();
    FileExporter::new().export(&request(&dir, lines(&["print(1)"]), ExportFormat::Code));
    let code = fs::read_to_string(dir.path().join("receipt.py")).unwrap();
    assert!(code.starts_with("# Source: receipt.png"));
    assert!(code.contains("print(1)"));

    FileExporter::new().export(&request(&dir, lines(&["100% done"]), ExportFormat::Latex));
    let tex = fs::read_to_string(dir.path().join("receipt.tex")).unwrap();
    assert!(tex.contains("100\\% done"));
    assert!(tex.trim_end().ends_with("\\end{document}"));
}

#[test]
fn write_failure_is_reported_not_raised() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "file").unwrap();
    let mut req = request(&dir, lines(&["x"]), ExportFormat::Txt);
    req.output_dir = blocker;
    let status = FileExporter::new().export(&req);
    assert!(status.starts_with("export failed:"), "{status}");
}
