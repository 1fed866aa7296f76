//! Table extraction from the HTML fragments and markdown the OCR service
//! returns, used by the spreadsheet and markdown exporters.

use scraper::{ElementRef, Html, Selector};

/// Rows of cell text; rows may have different lengths.
pub type Grid = Vec<Vec<String>>;

/// Upper bound on a single `colspan`, so a malformed attribute cannot blow up a row.
const MAX_COLSPAN: usize = 64;

/// Parses every `<table>` in `html` into a grid. `colspan` cells are
/// repeated across the columns they cover; cells hidden by a `rowspan` from
/// a previous row are filled with empty strings.
pub fn html_tables(html: &str) -> Vec<Grid> {
    let document = Html::parse_fragment(html);
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
    ) else {
        return Vec::new();
    };

    let mut tables = Vec::new();
    for table in document.select(&table_sel) {
        let mut grid: Grid = Vec::new();
        // (column, rows still covered)
        let mut pending_spans: Vec<(usize, usize)> = Vec::new();
        for row in table.select(&row_sel) {
            let mut cells: Vec<String> = Vec::new();
            let mut new_spans: Vec<(usize, usize)> = Vec::new();
            for cell in row.select(&cell_sel) {
                fill_spanned(&mut cells, &pending_spans);
                let text = cell_text(cell);
                let colspan = span_attr(cell, "colspan");
                let rowspan = span_attr(cell, "rowspan");
                let start = cells.len();
                for _ in 0..colspan {
                    cells.push(text.clone());
                }
                if rowspan > 1 {
                    for column in start..start + colspan {
                        new_spans.push((column, rowspan - 1));
                    }
                }
            }
            fill_spanned(&mut cells, &pending_spans);
            for (_, remaining) in pending_spans.iter_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            pending_spans.retain(|(_, remaining)| *remaining > 0);
            pending_spans.extend(new_spans);
            if !cells.is_empty() {
                grid.push(cells);
            }
        }
        if !grid.is_empty() {
            tables.push(grid);
        }
    }
    tables
}

fn fill_spanned(cells: &mut Vec<String>, pending_spans: &[(usize, usize)]) {
    while pending_spans
        .iter()
        .any(|(column, remaining)| *column == cells.len() && *remaining > 0)
    {
        cells.push(String::new());
    }
}

fn span_attr(cell: ElementRef<'_>, name: &str) -> usize {
    cell.value()
        .attr(name)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_COLSPAN)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses pipe tables out of a markdown document. The `|---|` separator rows
/// are dropped.
pub fn markdown_tables(markdown: &str) -> Vec<Grid> {
    let mut tables = Vec::new();
    let mut current: Grid = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('|') && trimmed.len() > 1 {
            if is_separator_row(trimmed) {
                continue;
            }
            let inner = trimmed.trim_start_matches('|').trim_end_matches('|');
            current.push(inner.split('|').map(|c| c.trim().to_string()).collect());
        } else if !current.is_empty() {
            tables.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tables.push(current);
    }
    tables
}

fn is_separator_row(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
        && line.contains('-')
}

/// Markdown rendition of HTML table fragments, for results that carry tables
/// but no markdown body.
pub fn tables_to_markdown(tables_html: &[String]) -> String {
    tables_html
        .iter()
        .map(|html| html2md::parse_html(html).trim().to_string())
        .filter(|md| !md.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
