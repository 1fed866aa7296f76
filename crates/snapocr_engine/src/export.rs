use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Workbook, XlsxError};
use serde_json::json;
use snapocr_logging::{clip, ocr_debug, ocr_warn};

use crate::persist::{AtomicFileWriter, PersistError};
use crate::tables::{self, Grid};
use crate::{LayoutBlock, OcrDocument};

/// Longest string a spreadsheet cell accepts.
const XLSX_CELL_LIMIT: usize = 32_000;
const XLSX_MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Json,
    Csv,
    Markdown,
    Html,
    Xlsx,
    Layout,
    Latex,
    Code,
    Docx,
    Pdf,
}

impl ExportFormat {
    /// Parses a user-facing label such as `"md"`, `"Markdown (.md)"` or
    /// `"EXCEL"`. Unknown labels fall back to plain text.
    pub fn from_label(label: &str) -> Self {
        let lowered = label.to_lowercase();
        for token in lowered.split(|c: char| !c.is_ascii_alphanumeric()) {
            let format = match token {
                "txt" | "text" | "plain" => ExportFormat::Txt,
                "json" => ExportFormat::Json,
                "csv" => ExportFormat::Csv,
                "md" | "markdown" => ExportFormat::Markdown,
                "html" | "htm" => ExportFormat::Html,
                "xlsx" | "excel" | "xls" => ExportFormat::Xlsx,
                "layout" => ExportFormat::Layout,
                "latex" | "tex" => ExportFormat::Latex,
                "code" | "py" | "python" => ExportFormat::Code,
                "docx" | "word" | "doc" => ExportFormat::Docx,
                "pdf" => ExportFormat::Pdf,
                _ => continue,
            };
            return format;
        }
        ExportFormat::Txt
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Layout => "layout",
            ExportFormat::Latex => "latex",
            ExportFormat::Code => "code",
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// Suffix appended to the output stem, including the dot.
    fn file_suffix(self) -> &'static str {
        match self {
            ExportFormat::Txt => ".txt",
            ExportFormat::Json => ".json",
            ExportFormat::Csv => ".csv",
            ExportFormat::Markdown | ExportFormat::Docx | ExportFormat::Pdf => ".md",
            ExportFormat::Html => ".html",
            ExportFormat::Xlsx => ".xlsx",
            ExportFormat::Layout => ".layout.json",
            ExportFormat::Latex => ".tex",
            ExportFormat::Code => ".py",
        }
    }
}

/// Everything an exporter needs for one item. Owned so it can move onto a
/// blocking thread.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    pub stem: String,
    pub text: String,
    pub markdown: String,
    pub tables_html: Vec<String>,
    pub layout: Vec<LayoutBlock>,
    pub raw: serde_json::Value,
    pub format: ExportFormat,
}

impl ExportRequest {
    pub fn from_document(
        source_path: PathBuf,
        output_dir: PathBuf,
        stem: String,
        document: OcrDocument,
        format: ExportFormat,
    ) -> Self {
        Self {
            text: document.text(),
            source_path,
            output_dir,
            stem,
            markdown: document.markdown,
            tables_html: document.tables_html,
            layout: document.layout,
            raw: document.raw,
            format,
        }
    }

    fn source_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Writes an item's recognized content somewhere and reports what happened.
pub trait Exporter: Send + Sync {
    /// Never fails: the returned status explains any fallback or failure.
    fn export(&self, request: &ExportRequest) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
}

enum Rendered {
    Text(String),
    Bytes(Vec<u8>),
}

/// Writes `<output_dir>/<stem>.<ext>` atomically.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExporter;

impl FileExporter {
    pub fn new() -> Self {
        Self
    }

    fn write(&self, request: &ExportRequest) -> Result<PathBuf, ExportError> {
        let rendered = render(request)?;
        let filename = format!("{}{}", request.stem, request.format.file_suffix());
        let writer = AtomicFileWriter::new(request.output_dir.clone());
        let path = match rendered {
            Rendered::Text(text) => writer.write(&filename, &text)?,
            Rendered::Bytes(bytes) => writer.write_bytes(&filename, &bytes)?,
        };
        Ok(path)
    }
}

impl Exporter for FileExporter {
    fn export(&self, request: &ExportRequest) -> String {
        match self.write(request) {
            Ok(path) => {
                let file = display_name(&path);
                ocr_debug!("exported {} as {}", file, request.format.label());
                match request.format {
                    ExportFormat::Docx | ExportFormat::Pdf => format!(
                        "{} renderer not bundled; exported markdown instead: {file}",
                        request.format.label().to_uppercase()
                    ),
                    _ => format!("exported: {file}"),
                }
            }
            Err(err) => {
                ocr_warn!("export of {} failed: {}", request.stem, err);
                format!("export failed: {err}")
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn render(request: &ExportRequest) -> Result<Rendered, ExportError> {
    let rendered = match request.format {
        ExportFormat::Txt => Rendered::Text(request.text.clone()),
        ExportFormat::Json => Rendered::Text(serde_json::to_string_pretty(&json!({
            "file": request.source_name(),
            "text": request.text,
            "raw_result": request.raw,
        }))?),
        ExportFormat::Csv => Rendered::Text(render_csv(&request.text)),
        ExportFormat::Markdown | ExportFormat::Docx | ExportFormat::Pdf => {
            Rendered::Text(render_markdown(request))
        }
        ExportFormat::Html => Rendered::Text(render_html(request)),
        ExportFormat::Xlsx => Rendered::Bytes(render_xlsx(request)?),
        ExportFormat::Layout => Rendered::Text(serde_json::to_string_pretty(&json!({
            "file": request.source_name(),
            "layout": request.layout,
            "raw_result": request.raw,
        }))?),
        ExportFormat::Latex => Rendered::Text(render_latex(request)),
        ExportFormat::Code => Rendered::Text(render_code(request)),
    };
    Ok(rendered)
}

fn markdown_body(request: &ExportRequest) -> String {
    if !request.markdown.trim().is_empty() {
        request.markdown.trim().to_string()
    } else if !request.tables_html.is_empty() {
        let tables = tables::tables_to_markdown(&request.tables_html);
        if request.text.is_empty() {
            tables
        } else {
            format!("{}\n\n{tables}", request.text)
        }
    } else {
        request.text.clone()
    }
}

fn render_markdown(request: &ExportRequest) -> String {
    let body = markdown_body(request);
    if body.trim_start().starts_with('#') {
        body
    } else {
        format!("# {}\n\n{body}\n", request.stem)
    }
}

fn render_csv(text: &str) -> String {
    let mut out = String::from("line,text\n");
    // Blank lines are skipped but keep their numbers.
    for (number, line) in text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
    {
        out.push_str(&format!("{},{}\n", number + 1, csv_field(line)));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_html(request: &ExportRequest) -> String {
    let body = if request.tables_html.is_empty() {
        markdown_to_html_blocks(&markdown_body(request))
    } else {
        request.tables_html.join("\n<br/>\n")
    };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        escape_html(&request.stem)
    )
}

/// Headings become `<hN>`, blank-line separated runs become paragraphs.
fn markdown_to_html_blocks(markdown: &str) -> String {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) && trimmed[level..].starts_with(' ') {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(format!(
                "<h{level}>{}</h{level}>",
                escape_html(trimmed[level..].trim())
            ));
        } else {
            paragraph.push(trimmed);
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks.join("\n")
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<String>) {
    if !paragraph.is_empty() {
        let lines: Vec<String> = paragraph.iter().map(|line| escape_html(line)).collect();
        blocks.push(format!("<p>{}</p>", lines.join("<br/>")));
        paragraph.clear();
    }
}

fn spreadsheet_grids(request: &ExportRequest) -> Vec<(String, Grid)> {
    let html_grids: Vec<Grid> = request
        .tables_html
        .iter()
        .flat_map(|html| tables::html_tables(html))
        .collect();
    let grids = if html_grids.is_empty() {
        tables::markdown_tables(&request.markdown)
    } else {
        html_grids
    };
    if !grids.is_empty() {
        return grids
            .into_iter()
            .enumerate()
            .map(|(i, grid)| (format!("Table {}", i + 1), grid))
            .collect();
    }

    let listing: Grid = if request.layout.is_empty() {
        std::iter::once(vec!["line".to_string(), "text".to_string()])
            .chain(
                request
                    .text
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .enumerate()
                    .map(|(i, line)| vec![(i + 1).to_string(), line.to_string()]),
            )
            .collect()
    } else {
        std::iter::once(vec![
            "order".to_string(),
            "label".to_string(),
            "content".to_string(),
        ])
        .chain(request.layout.iter().map(|block| {
            vec![
                block.order.map(|o| o.to_string()).unwrap_or_default(),
                block.label.clone(),
                block.content.clone(),
            ]
        }))
        .collect()
    };
    vec![("Text".to_string(), listing)]
}

fn render_xlsx(request: &ExportRequest) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    for (name, grid) in spreadsheet_grids(request) {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&name)?;
        for (row, cells) in grid.iter().enumerate() {
            let Ok(row) = u32::try_from(row) else {
                break;
            };
            for (col, value) in cells.iter().take(XLSX_MAX_COLUMNS).enumerate() {
                if value.is_empty() {
                    continue;
                }
                let Ok(col) = u16::try_from(col) else {
                    break;
                };
                worksheet.write_string(row, col, clip(value, XLSX_CELL_LIMIT))?;
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

fn escape_latex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

fn render_latex(request: &ExportRequest) -> String {
    let mut out = String::from(
        "\\documentclass{article}\n\\usepackage[utf8]{inputenc}\n\\begin{document}\n",
    );
    out.push_str(&format!("\\section*{{{}}}\n\n", escape_latex(&request.stem)));
    for paragraph in request.text.split("\n\n") {
        let lines: Vec<String> = paragraph
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(escape_latex)
            .collect();
        if !lines.is_empty() {
            out.push_str(&lines.join("\\\\\n"));
            out.push_str("\n\n");
        }
    }
    for grid in request
        .tables_html
        .iter()
        .flat_map(|html| tables::html_tables(html))
    {
        let columns = grid.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            continue;
        }
        out.push_str(&format!("\\begin{{tabular}}{{{}}}\n\\hline\n", "|l".repeat(columns) + "|"));
        for row in &grid {
            let cells: Vec<String> = (0..columns)
                .map(|i| row.get(i).map(|c| escape_latex(c)).unwrap_or_default())
                .collect();
            out.push_str(&cells.join(" & "));
            out.push_str(" \\\\\n\\hline\n");
        }
        out.push_str("\\end{tabular}\n\n");
    }
    out.push_str("\\end{document}\n");
    out
}

fn render_code(request: &ExportRequest) -> String {
    format!(
        "# Source: {}\n# Recognized text follows.\n\n{}\n",
        request.source_name(),
        request.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_parsed_leniently() {
        assert_eq!(ExportFormat::from_label("Markdown (.md)"), ExportFormat::Markdown);
        assert_eq!(ExportFormat::from_label(" EXCEL "), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_label("tex"), ExportFormat::Latex);
        assert_eq!(ExportFormat::from_label("Word"), ExportFormat::Docx);
        assert_eq!(ExportFormat::from_label("whatever"), ExportFormat::Txt);
        assert_eq!(ExportFormat::from_label(""), ExportFormat::Txt);
    }

    #[test]
    fn csv_quotes_special_fields() {
        let csv = render_csv("plain\n\n a,b \nsay \"hi\"");
        assert_eq!(csv, "line,text\n1,plain\n2,\" a,b \"\n3,\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn headings_and_paragraphs_become_html() {
        let html = markdown_to_html_blocks("# Title\nnot#heading\n\na < b\nnext");
        assert_eq!(
            html,
            "<h1>Title</h1>\n<p>not#heading</p>\n<p>a &lt; b<br/>next</p>"
        );
    }

    #[test]
    fn latex_special_characters_are_escaped() {
        assert_eq!(escape_latex("50% of $x_1"), "50\\% of \\$x\\_1");
    }
}
