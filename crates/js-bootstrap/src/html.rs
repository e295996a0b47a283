//! Inline `<script>` extraction.
//!
//! This is a tag scanner, not an HTML parser: it finds `<script ...>`
//! openers, skips external and non-JavaScript blocks, and returns bodies
//! in document order. Malformed input never fails; an unterminated block
//! ends the scan.

const OPEN: &str = "<script";
const CLOSE: &str = "</script";

const JS_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "text/ecmascript",
    "application/ecmascript",
    "text/jscript",
    "module",
];

pub fn inline_scripts(html: &str) -> Vec<String> {
    // ASCII lowering keeps byte offsets identical to `html`.
    let lower = html.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut out = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = lower[cursor..].find(OPEN) {
        let name_end = cursor + rel + OPEN.len();
        match bytes.get(name_end) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {}
            _ => {
                cursor = name_end;
                continue;
            }
        }
        let Some(tag_end) = find_tag_end(bytes, name_end) else {
            break;
        };
        let body_start = tag_end + 1;
        let Some(close_rel) = lower[body_start..].find(CLOSE) else {
            break;
        };
        let body_end = body_start + close_rel;
        if is_inline_javascript(&html[name_end..tag_end]) {
            let body = html[body_start..body_end].trim();
            if !body.is_empty() {
                out.push(body.to_string());
            }
        }
        cursor = body_end + CLOSE.len();
    }
    out
}

/// Index of the `>` closing the tag opened before `from`, ignoring quoted
/// attribute values.
fn find_tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, &b) in bytes[from..].iter().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(from + offset),
            _ => {}
        }
    }
    None
}

fn is_inline_javascript(attrs: &str) -> bool {
    let mut script_type = None;
    for (name, value) in parse_attributes(attrs) {
        match name.as_str() {
            "src" => return false,
            "type" => script_type = value,
            _ => {}
        }
    }
    match script_type {
        None => true,
        Some(value) => {
            let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            essence.is_empty() || JS_TYPES.contains(&essence.as_str())
        }
    }
}

fn parse_attributes(attrs: &str) -> Vec<(String, Option<String>)> {
    let bytes = attrs.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'/') {
            i += 1;
        }
        if name_start == i {
            break;
        }
        let name = attrs[name_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            out.push((name, None));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = match bytes.get(i) {
            Some(&q @ (b'"' | b'\'')) => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| b == q)
                    .map_or(bytes.len(), |p| start + p);
                i = (end + 1).min(bytes.len());
                &attrs[start..end]
            }
            _ => {
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                &attrs[start..i]
            }
        };
        out.push((name, Some(value.to_string())));
    }
    out
}
