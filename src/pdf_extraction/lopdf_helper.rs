// lopdf helper - Pure Rust PDF operations
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::types::{HarvestError, Result};

/// Load a PDF document from memory using lopdf
pub fn load_pdf(bytes: &[u8]) -> Result<Document> {
    Document::load_mem(bytes).map_err(|e| HarvestError::parse("load", e))
}

/// Follow one level of indirection.
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

pub fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub fn dict_get<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    resolve(document, dict.get(key).ok()?)
}

pub fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(*f as f64),
        _ => None,
    }
}

pub fn name_of(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

/// Look up a page attribute, walking up `/Parent` for inheritable keys.
pub fn inherited<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = document.get_object(page_id).ok()?.as_dict().ok()?;
    // Page trees are shallow; the bound guards against reference cycles.
    for _ in 0..32 {
        if let Some(value) = dict_get(document, current, key) {
            return Some(value);
        }
        current = dict_get(document, current, b"Parent")?.as_dict().ok()?;
    }
    None
}

/// `[x0 y0 x1 y1]` normalised so that x0 <= x1 and y0 <= y1.
pub fn rect_of(document: &Document, object: &Object) -> Option<[f64; 4]> {
    let values: Vec<f64> = match resolve(document, object)? {
        Object::Array(arr) => arr
            .iter()
            .filter_map(|o| resolve(document, o).and_then(as_number))
            .collect(),
        _ => return None,
    };
    if values.len() != 4 {
        return None;
    }
    Some([
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ])
}

/// Page MediaBox, defaulting to US Letter.
pub fn media_box(document: &Document, page_id: ObjectId) -> [f64; 4] {
    inherited(document, page_id, b"MediaBox")
        .and_then(|obj| rect_of(document, obj))
        .unwrap_or([0.0, 0.0, 612.0, 792.0])
}

/// Stream payload, decompressed when a filter is declared.
pub fn stream_bytes(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.get(b"Filter").is_err() {
        return Some(stream.content.clone());
    }
    stream.decompressed_content().ok()
}

/// Concatenated content streams of a page or form.
pub fn content_bytes(document: &Document, contents: &Object) -> Vec<u8> {
    match resolve(document, contents) {
        Some(Object::Stream(stream)) => stream_bytes(stream).unwrap_or_default(),
        Some(Object::Array(parts)) => {
            let mut data = Vec::new();
            for part in parts {
                data.extend(content_bytes(document, part));
                data.push(b'\n');
            }
            data
        }
        _ => Vec::new(),
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise UTF-8, otherwise Latin-1.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return decode_utf16_be(&bytes[2..]);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

pub fn decode_utf16_be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Extract a string value from a dictionary, handling both String and Name types.
pub fn string_value(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict_get(document, dict, key)? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}
