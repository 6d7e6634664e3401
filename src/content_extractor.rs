// SPATIALLY ACCURATE PDF TEXT EXTRACTION - Pure Rust Implementation
//
// Interprets page content streams into positioned text fragments and collects
// the page's link annotations. This is the single geometry parse shared by the
// structured text strategy and the hyperlink correlator.
use log::{debug, warn};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::pdf_extraction::lopdf_helper::{
    as_number, content_bytes, decode_text_string, decode_utf16_be, dict_get, inherited, media_box,
    name_of, rect_of, resolve, resolve_dict, stream_bytes, string_value,
};
use crate::types::{HarvestError, LinkAnnotation, LinkRect, PageLayout, Result, TextFragment};

// Form XObjects may nest; anything deeper than this is ignored.
const MAX_FORM_DEPTH: usize = 4;
// Glyph widths are not read from font programs; half an em is the estimate.
const AVG_GLYPH_WIDTH: f64 = 0.5;
// TJ kerning (thousandths of an em) beyond this reads as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -200.0;

/// Parse every page. Pages that fail to parse come back empty so page
/// numbering stays aligned with the document.
pub fn parse_document(document: &Document) -> Vec<PageLayout> {
    document
        .get_pages()
        .into_iter()
        .map(|(page_no, page_id)| {
            parse_page(document, page_no, page_id).unwrap_or_else(|e| {
                warn!("page {} geometry parse failed: {}", page_no, e);
                PageLayout::new(page_no)
            })
        })
        .collect()
}

pub fn parse_page(document: &Document, page_no: u32, page_id: ObjectId) -> Result<PageLayout> {
    let bounds = media_box(document, page_id);
    let mut layout = PageLayout::new(page_no);

    let resources = inherited(document, page_id, b"Resources").and_then(|r| resolve_dict(document, r));
    let page_dict = document.get_object(page_id)?.as_dict()?;

    if let Ok(contents) = page_dict.get(b"Contents") {
        let data = content_bytes(document, contents);
        let mut interpreter = Interpreter::new(document, bounds);
        interpreter.run(&data, resources, Matrix::IDENTITY, 0)?;
        layout.fragments = interpreter.fragments;
    }

    layout.links = extract_links(document, page_dict, page_no, bounds);
    debug!(
        "page {}: {} fragments, {} links",
        page_no,
        layout.fragments.len(),
        layout.links.len()
    );
    Ok(layout)
}

/// Affine transform in PDF row-vector order `[a b c d e f]`.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().filter_map(as_number).collect();
        (values.len() == 6).then(|| Matrix([values[0], values[1], values[2], values[3], values[4], values[5]]))
    }

    /// `self × other`
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn origin(&self) -> (f64, f64) {
        (self.0[4], self.0[5])
    }
}

/// Code-to-Unicode table parsed from a font's ToUnicode CMap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToUnicodeMap {
    code_width: usize,
    map: HashMap<u32, String>,
}

static CODESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"begincodespacerange\s*<([0-9A-Fa-f]+)>").unwrap());
static BFCHAR_SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)beginbfchar(.*?)endbfchar").unwrap());
static BFRANGE_SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)beginbfrange(.*?)endbfrange").unwrap());
static BFCHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]*)>").unwrap());
static BFRANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]+)>\s*(<[0-9A-Fa-f]*>|\[[^\]]*\])").unwrap()
});
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([0-9A-Fa-f]*)>").unwrap());

fn hex_bytes(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

fn hex_code(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex, 16).ok()
}

impl ToUnicodeMap {
    pub fn parse(cmap: &str) -> Self {
        let mut table = ToUnicodeMap::default();

        for section in BFCHAR_SECTION_RE.captures_iter(cmap) {
            for pair in BFCHAR_RE.captures_iter(&section[1]) {
                table.note_width(&pair[1]);
                if let Some(code) = hex_code(&pair[1]) {
                    table.map.insert(code, decode_utf16_be(&hex_bytes(&pair[2])));
                }
            }
        }

        for section in BFRANGE_SECTION_RE.captures_iter(cmap) {
            for range in BFRANGE_RE.captures_iter(&section[1]) {
                table.note_width(&range[1]);
                let (Some(lo), Some(hi)) = (hex_code(&range[1]), hex_code(&range[2])) else {
                    continue;
                };
                if hi < lo || hi - lo > 0xFFFF {
                    continue;
                }
                let target = &range[3];
                if target.starts_with('[') {
                    for (code, dst) in (lo..=hi).zip(HEX_RE.captures_iter(target)) {
                        table.map.insert(code, decode_utf16_be(&hex_bytes(&dst[1])));
                    }
                } else {
                    let base: Vec<u16> = hex_bytes(target.trim_matches(|c: char| c == '<' || c == '>'))
                        .chunks_exact(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                    let Some((&last, head)) = base.split_last() else {
                        continue;
                    };
                    for code in lo..=hi {
                        let mut units = head.to_vec();
                        units.push(last.wrapping_add((code - lo) as u16));
                        table.map.insert(code, String::from_utf16_lossy(&units));
                    }
                }
            }
        }

        if let Some(cap) = CODESPACE_RE.captures(cmap) {
            table.code_width = (cap[1].len() / 2).max(1);
        }
        if table.code_width == 0 {
            table.code_width = 1;
        }
        table
    }

    fn note_width(&mut self, hex: &str) {
        if self.code_width == 0 {
            self.code_width = (hex.len() / 2).max(1);
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::new();
        for chunk in bytes.chunks(self.code_width.max(1)) {
            let code = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
            match self.map.get(&code) {
                Some(text) => out.push_str(text),
                None if self.code_width <= 1 => out.push(win_ansi_char(chunk[0])),
                None => {}
            }
        }
        out
    }
}

/// How to turn shown string bytes into text for one font resource.
#[derive(Debug, Clone, Default)]
struct FontDecoder {
    to_unicode: Option<ToUnicodeMap>,
    composite: bool,
}

impl FontDecoder {
    fn from_dict(document: &Document, font: &Dictionary) -> Self {
        let composite = font
            .get(b"Subtype")
            .ok()
            .and_then(name_of)
            .map_or(false, |s| s == b"Type0");
        let to_unicode = dict_get(document, font, b"ToUnicode").and_then(|obj| match obj {
            Object::Stream(stream) => stream_bytes(stream),
            _ => None,
        });
        Self {
            to_unicode: to_unicode.map(|data| ToUnicodeMap::parse(&String::from_utf8_lossy(&data))),
            composite,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if let Some(cmap) = &self.to_unicode {
            return cmap.decode(bytes);
        }
        if bytes.starts_with(&[0xFE, 0xFF]) {
            return decode_text_string(bytes);
        }
        if self.composite {
            // Identity-encoded CIDs without a ToUnicode map carry no text.
            return String::new();
        }
        bytes.iter().map(|&b| win_ansi_char(b)).collect()
    }
}

/// WinAnsi for the 0x80..0x9F block, Latin-1 elsewhere.
fn win_ansi_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x85 => '\u{2026}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x99 => '\u{2122}',
        b => b as char,
    }
}

fn load_fonts(document: &Document, resources: Option<&Dictionary>) -> HashMap<Vec<u8>, FontDecoder> {
    let mut fonts = HashMap::new();
    let Some(font_dict) = resources
        .and_then(|res| dict_get(document, res, b"Font"))
        .and_then(|obj| obj.as_dict().ok())
    else {
        return fonts;
    };
    for (name, obj) in font_dict.iter() {
        if let Some(font) = resolve_dict(document, obj) {
            fonts.insert(name.clone(), FontDecoder::from_dict(document, font));
        }
    }
    fonts
}

#[derive(Debug, Clone)]
struct TextState {
    font: Option<Vec<u8>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    leading: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            leading: 0.0,
        }
    }
}

struct Interpreter<'a> {
    document: &'a Document,
    bounds: [f64; 4],
    fragments: Vec<TextFragment>,
}

impl<'a> Interpreter<'a> {
    fn new(document: &'a Document, bounds: [f64; 4]) -> Self {
        Self {
            document,
            bounds,
            fragments: Vec::new(),
        }
    }

    fn run(
        &mut self,
        data: &[u8],
        resources: Option<&'a Dictionary>,
        base_ctm: Matrix,
        depth: usize,
    ) -> Result<()> {
        let content = Content::decode(data).map_err(|e| HarvestError::parse("content stream", e))?;
        let fonts = load_fonts(self.document, resources);

        let mut ctm = base_ctm;
        let mut ctm_stack: Vec<Matrix> = Vec::new();
        let mut state = TextState::default();
        let mut state_stack: Vec<TextState> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;

        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "q" => {
                    ctm_stack.push(ctm);
                    state_stack.push(state.clone());
                }
                "Q" => {
                    ctm = ctm_stack.pop().unwrap_or(base_ctm);
                    state = state_stack.pop().unwrap_or_default();
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        ctm = m.then(&ctm);
                    }
                }
                "BT" | "ET" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "Tf" => {
                    state.font = operands.first().and_then(name_of).map(|n| n.to_vec());
                    if let Some(size) = operands.get(1).and_then(as_number) {
                        state.font_size = size;
                    }
                }
                "Tc" => state.char_spacing = number_at(operands, 0),
                "Tw" => state.word_spacing = number_at(operands, 0),
                "TL" => state.leading = number_at(operands, 0),
                "Td" | "TD" => {
                    let (tx, ty) = (number_at(operands, 0), number_at(operands, 1));
                    if op.operator == "TD" {
                        state.leading = -ty;
                    }
                    tlm = Matrix::translate(tx, ty).then(&tlm);
                    tm = tlm;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(operands) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -state.leading).then(&tlm);
                    tm = tlm;
                }
                "Tj" | "'" | "\"" => {
                    if op.operator != "Tj" {
                        if op.operator == "\"" {
                            state.word_spacing = number_at(operands, 0);
                            state.char_spacing = number_at(operands, 1);
                        }
                        tlm = Matrix::translate(0.0, -state.leading).then(&tlm);
                        tm = tlm;
                    }
                    if let Some(Object::String(bytes, _)) = operands.last() {
                        let text = self.decode(&fonts, &state, bytes);
                        let advance = self.advance(&state, &text);
                        self.emit(&tm, &ctm, text);
                        tm = Matrix::translate(advance, 0.0).then(&tm);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        let mut text = String::new();
                        let mut advance = 0.0;
                        for item in items {
                            match item {
                                Object::String(bytes, _) => {
                                    let piece = self.decode(&fonts, &state, bytes);
                                    advance += self.advance(&state, &piece);
                                    text.push_str(&piece);
                                }
                                other => {
                                    if let Some(kern) = as_number(other) {
                                        advance -= kern / 1000.0 * state.font_size;
                                        if kern < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                            text.push(' ');
                                        }
                                    }
                                }
                            }
                        }
                        self.emit(&tm, &ctm, text);
                        tm = Matrix::translate(advance, 0.0).then(&tm);
                    }
                }
                "Do" if depth < MAX_FORM_DEPTH => {
                    if let Some(name) = operands.first().and_then(name_of) {
                        self.run_form(name, resources, &ctm, depth)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn run_form(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: &Matrix,
        depth: usize,
    ) -> Result<()> {
        let document = self.document;
        let Some(Object::Stream(form)) = resources
            .and_then(|res| dict_get(document, res, b"XObject"))
            .and_then(|xobjects| xobjects.as_dict().ok())
            .and_then(|xobjects| dict_get(document, xobjects, name))
        else {
            return Ok(());
        };
        let is_form = form
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(name_of)
            .map_or(false, |s| s == b"Form");
        if !is_form {
            return Ok(());
        }
        let matrix = form
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| m.as_array().ok())
            .and_then(|m| Matrix::from_operands(m))
            .unwrap_or(Matrix::IDENTITY);
        let form_resources = dict_get(document, &form.dict, b"Resources")
            .and_then(|r| r.as_dict().ok())
            .or(resources);
        let data = stream_bytes(form).unwrap_or_default();
        if let Err(e) = self.run(&data, form_resources, matrix.then(ctm), depth + 1) {
            debug!("skipping unreadable form xobject: {}", e);
        }
        Ok(())
    }

    fn decode(&self, fonts: &HashMap<Vec<u8>, FontDecoder>, state: &TextState, bytes: &[u8]) -> String {
        match state.font.as_ref().and_then(|name| fonts.get(name)) {
            Some(font) => font.decode(bytes),
            None => FontDecoder::default().decode(bytes),
        }
    }

    fn advance(&self, state: &TextState, text: &str) -> f64 {
        let glyphs = text.chars().count() as f64;
        let spaces = text.chars().filter(|c| *c == ' ').count() as f64;
        glyphs * (state.font_size * AVG_GLYPH_WIDTH + state.char_spacing) + spaces * state.word_spacing
    }

    fn emit(&mut self, tm: &Matrix, ctm: &Matrix, text: String) {
        let content = text.trim();
        if content.is_empty() {
            return;
        }
        let (x, y) = tm.then(ctm).origin();
        // Flip to a top-left origin so ascending y is reading order.
        self.fragments.push(TextFragment::new(
            x - self.bounds[0],
            self.bounds[3] - y,
            content,
        ));
    }
}

fn number_at(operands: &[Object], index: usize) -> f64 {
    operands.get(index).and_then(as_number).unwrap_or(0.0)
}

/// `/Link` annotations with a URI action on one page.
pub fn extract_links(
    document: &Document,
    page_dict: &Dictionary,
    page_no: u32,
    bounds: [f64; 4],
) -> Vec<LinkAnnotation> {
    let Some(Object::Array(annots)) = dict_get(document, page_dict, b"Annots") else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for entry in annots {
        let Some(annot) = resolve_dict(document, entry) else {
            continue;
        };
        let is_link = annot
            .get(b"Subtype")
            .ok()
            .and_then(name_of)
            .map_or(false, |s| s == b"Link");
        if !is_link {
            continue;
        }
        let Some(uri) = link_uri(document, annot) else {
            continue;
        };
        let rect = annot
            .get(b"Rect")
            .ok()
            .and_then(|r| rect_of(document, r))
            .map(|[x0, y0, x1, y1]| LinkRect {
                x: x0 - bounds[0],
                y: bounds[3] - y1,
                w: x1 - x0,
                h: y1 - y0,
            });
        links.push(LinkAnnotation {
            uri,
            page: page_no,
            rect,
        });
    }
    links
}

fn link_uri(document: &Document, annot: &Dictionary) -> Option<String> {
    if let Some(action) = annot.get(b"A").ok().and_then(|a| resolve_dict(document, a)) {
        let is_uri = action
            .get(b"S")
            .ok()
            .and_then(|s| resolve(document, s))
            .and_then(name_of)
            .map_or(false, |s| s == b"URI");
        if is_uri {
            return string_value(document, action, b"URI").filter(|u| !u.trim().is_empty());
        }
        return None;
    }
    string_value(document, annot, b"URI").filter(|u| !u.trim().is_empty())
}
