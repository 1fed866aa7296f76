use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Windows-safe output stem for a source file: its sanitized file stem.
pub fn output_stem(source: &Path) -> String {
    let raw = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_stem(&raw)
}

/// Output stems for every input of a job. Inputs sharing a stem get a
/// `--{short_hash(path)}` suffix so concurrent tasks never write the same file.
pub fn assign_output_stems(inputs: &[PathBuf]) -> Vec<String> {
    let stems: Vec<String> = inputs.iter().map(|path| output_stem(path)).collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.to_lowercase()).or_default() += 1;
    }
    stems
        .into_iter()
        .zip(inputs)
        .map(|(stem, path)| {
            if counts.get(&stem.to_lowercase()).copied().unwrap_or(0) > 1 {
                format!("{stem}--{}", short_hash(&path.to_string_lossy()))
            } else {
                stem
            }
        })
        .collect()
}

fn sanitize_stem(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]).to_string();
    if cleaned.is_empty() {
        cleaned = "untitled".to_string();
    }
    // Collapse multiple underscores
    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }
    let mut final_name: String = compacted.chars().take(120).collect();
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_keeps_unicode_and_strips_forbidden_chars() {
        assert_eq!(output_stem(Path::new("/in/发票 2024.png")), "发票 2024");
        assert_eq!(output_stem(Path::new("scan:a?b.pdf")), "scan_a_b");
        assert_eq!(output_stem(Path::new("CON.png")), "CON_");
        assert_eq!(output_stem(Path::new("...")), "untitled");
    }

    #[test]
    fn duplicate_stems_get_distinct_suffixes() {
        let inputs = vec![
            PathBuf::from("/a/page.png"),
            PathBuf::from("/b/page.png"),
            PathBuf::from("/b/other.png"),
        ];
        let stems = assign_output_stems(&inputs);
        assert_eq!(stems[2], "other");
        assert!(stems[0].starts_with("page--"));
        assert!(stems[1].starts_with("page--"));
        assert_ne!(stems[0], stems[1]);
        assert_eq!(stems, assign_output_stems(&inputs));
    }
}
