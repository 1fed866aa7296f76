//! Normalizes the result shapes returned by the OCR service into an
//! [`OcrDocument`].

use serde_json::Value;

use crate::{LayoutBlock, OcrDocument};

/// Parses a 200 response body. Unknown shapes yield an empty document with
/// `debug_info` listing the keys that were present.
pub fn parse_ocr_payload(payload: &Value) -> OcrDocument {
    let result = payload.get("result").cloned().unwrap_or(Value::Null);
    let mut doc = OcrDocument::default();

    if let Some(items) = result.get("layoutParsingResults").and_then(Value::as_array) {
        for item in items {
            collect_layout_item(item, &mut doc);
        }
    }

    if let Some(items) = result.get("ocrResults").and_then(Value::as_array) {
        for item in items {
            if let Some(pruned) = item.get("prunedResult") {
                match pruned {
                    Value::String(text) => doc.lines.push(text.clone()),
                    Value::Object(_) => doc.lines.extend(string_items(pruned.get("rec_texts"))),
                    _ => {}
                }
            }
            doc.lines.extend(
                string_items(item.get("rec_texts")).filter(|text| !text.trim().is_empty()),
            );
        }
    }

    if doc.lines.is_empty() {
        doc.lines.extend(
            string_items(result.get("rec_texts")).filter(|text| !text.trim().is_empty()),
        );
    }

    if doc.lines.is_empty() {
        if let Some(items) = result.get("structureResults").and_then(Value::as_array) {
            for item in items {
                doc.lines.extend(string_items(item.get("rec_texts")));
            }
        }
    }

    if doc.lines.is_empty() && doc.markdown.is_empty() && doc.tables_html.is_empty() {
        let keys: Vec<&str> = result
            .as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default();
        doc.debug_info = Some(format!("no text found; result keys: {keys:?}"));
    }

    doc.raw = result;
    doc
}

fn collect_layout_item(item: &Value, doc: &mut OcrDocument) {
    if let Some(text) = item
        .get("markdown")
        .and_then(|md| md.get("text"))
        .and_then(Value::as_str)
    {
        if !text.is_empty() {
            doc.markdown.push_str(text);
            doc.markdown.push_str("\n\n");
        }
    }

    if let Some(tables) = item.get("table_res_list").and_then(Value::as_array) {
        doc.tables_html.extend(
            tables
                .iter()
                .filter_map(|table| table.get("pred_html").and_then(Value::as_str))
                .map(str::to_string),
        );
    }

    match item.get("prunedResult") {
        Some(Value::String(text)) => doc.lines.push(text.clone()),
        Some(pruned @ Value::Object(_)) => {
            if let Some(text) = pruned.get("text").and_then(Value::as_str) {
                doc.lines.push(text.to_string());
            }
            doc.lines.extend(string_items(pruned.get("rec_texts")));
        }
        _ => {}
    }

    if let Some(blocks) = item.get("parsing_res_list").and_then(Value::as_array) {
        for block in blocks {
            let content = block
                .get("block_content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if content.is_empty() {
                continue;
            }
            let label = block
                .get("block_label")
                .and_then(Value::as_str)
                .unwrap_or("text");
            // Table blocks are already represented by their HTML.
            if label != "table" {
                doc.lines.push(content.to_string());
            }
            doc.layout.push(LayoutBlock {
                label: label.to_string(),
                content: content.to_string(),
                bbox: block.get("block_bbox").and_then(Value::as_array).map(|coords| {
                    coords.iter().filter_map(Value::as_f64).collect()
                }),
                order: block.get("block_order").and_then(Value::as_i64),
            });
        }
    }
}

fn string_items(value: Option<&Value>) -> impl Iterator<Item = String> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
}
