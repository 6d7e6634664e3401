// Embedded raster image recovery
//
// Stage one walks the document's own image objects (and base64 data URIs).
// Stage two carves complete JPEG/PNG/WEBP containers out of the raw bytes by
// signature. Both stages share the same size bounds.
use base64::Engine;
use image::{DynamicImage, GrayImage, RgbImage};
use log::{debug, info};
use lopdf::{Document, Object, Stream};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::Cursor;

use crate::config::PipelineConfig;
use crate::pdf_extraction::lopdf_helper::{as_number, name_of};
use crate::types::{ExtractedImage, HarvestError, ImageCandidate, ImageFormat, ImageOrigin, Result};

const JPEG_SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
const JPEG_EOI: &[u8] = &[0xFF, 0xD9];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_IEND: &[u8] = b"IEND";

static DATA_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)data:image/(png|jpe?g|webp);base64,([A-Za-z0-9+/=\r\n]+)").unwrap()
});

/// Size window that separates real pictures from icons and noise.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SizeBounds {
    pub min: usize,
    pub max: usize,
}

impl SizeBounds {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min: config.min_image_bytes,
            max: config.max_image_bytes,
        }
    }

    pub fn accepts(&self, size: usize) -> bool {
        size >= self.min && size <= self.max
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min: 2 * 1024,
            max: 10 * 1024 * 1024,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// JPEG: SOI followed by a marker, ending at the first EOI after it.
pub fn scan_jpeg(bytes: &[u8], bounds: SizeBounds) -> Vec<ImageCandidate> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find(bytes, JPEG_SOI, cursor) {
        let Some(eoi) = find(bytes, JPEG_EOI, start + 2) else {
            break;
        };
        let candidate = ImageCandidate::new(start, eoi + JPEG_EOI.len(), ImageFormat::Jpeg);
        if bounds.accepts(candidate.size) {
            cursor = candidate.end;
            found.push(candidate);
        } else {
            cursor = start + 2;
        }
    }
    found
}

/// PNG: signature through the `IEND` tag and its 4-byte CRC.
pub fn scan_png(bytes: &[u8], bounds: SizeBounds) -> Vec<ImageCandidate> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find(bytes, PNG_SIGNATURE, cursor) {
        let Some(iend) = find(bytes, PNG_IEND, start + PNG_SIGNATURE.len()) else {
            break;
        };
        let end = iend + PNG_IEND.len() + 4;
        if end > bytes.len() {
            break;
        }
        let candidate = ImageCandidate::new(start, end, ImageFormat::Png);
        if bounds.accepts(candidate.size) {
            cursor = end;
            found.push(candidate);
        } else {
            cursor = start + PNG_SIGNATURE.len();
        }
    }
    found
}

/// WEBP: `RIFF` + little-endian chunk size + `WEBP`; extent is size + 8.
pub fn scan_webp(bytes: &[u8], bounds: SizeBounds) -> Vec<ImageCandidate> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find(bytes, b"RIFF", cursor) {
        cursor = start + 4;
        if start + 12 > bytes.len() || &bytes[start + 8..start + 12] != b"WEBP" {
            continue;
        }
        let size = u32::from_le_bytes([
            bytes[start + 4],
            bytes[start + 5],
            bytes[start + 6],
            bytes[start + 7],
        ]) as usize;
        let end = start + 8 + size;
        if end > bytes.len() {
            continue;
        }
        let candidate = ImageCandidate::new(start, end, ImageFormat::Webp);
        if bounds.accepts(candidate.size) {
            cursor = end;
            found.push(candidate);
        }
    }
    found
}

/// Keep the larger of any overlapping pair. Output is ordered by `start`.
pub fn resolve_overlaps(mut candidates: Vec<ImageCandidate>) -> Vec<ImageCandidate> {
    candidates.sort_by(|a, b| b.size.cmp(&a.size).then(a.start.cmp(&b.start)));
    let mut chosen: Vec<ImageCandidate> = Vec::new();
    for candidate in candidates {
        if chosen.iter().all(|kept| !kept.overlaps(&candidate)) {
            chosen.push(candidate);
        }
    }
    chosen.sort_by_key(|c| c.start);
    chosen
}

/// All signature scans, size-filtered and made non-overlapping.
pub fn scan_bytes(bytes: &[u8], bounds: SizeBounds) -> Vec<ImageCandidate> {
    let mut candidates = scan_jpeg(bytes, bounds);
    candidates.extend(scan_png(bytes, bounds));
    candidates.extend(scan_webp(bytes, bounds));
    resolve_overlaps(candidates)
}

/// Like [`scan_bytes`], but a buffer with no image container in it is an error.
pub fn scan_containers(bytes: &[u8], bounds: SizeBounds) -> Result<Vec<ImageCandidate>> {
    let candidates = scan_bytes(bytes, bounds);
    if candidates.is_empty() {
        return Err(HarvestError::MalformedDocument(format!(
            "no image container in {} bytes",
            bytes.len()
        )));
    }
    Ok(candidates)
}

/// The single largest candidate, e.g. a profile photo.
pub fn best_candidate(bytes: &[u8], bounds: SizeBounds) -> Option<ImageCandidate> {
    scan_bytes(bytes, bounds).into_iter().max_by_key(|c| c.size)
}

fn format_of(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        _ => None,
    }
}

fn filter_names(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items.iter().filter_map(name_of).map(|n| n.to_vec()).collect(),
        _ => Vec::new(),
    }
}

/// Decode one image XObject into a self-describing container.
fn image_from_xobject(stream: &Stream) -> Option<(Vec<u8>, ImageFormat)> {
    let filters = filter_names(stream);
    match filters.last().map(|f| f.as_slice()) {
        Some(b"DCTDecode") if filters.len() == 1 => {
            let bytes = stream.content.clone();
            (format_of(&bytes) == Some(ImageFormat::Jpeg)).then_some((bytes, ImageFormat::Jpeg))
        }
        Some(b"FlateDecode") | None => {
            let pixels = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream.decompressed_content().ok()?
            };
            encode_raw_pixels(stream, pixels).map(|png| (png, ImageFormat::Png))
        }
        _ => None,
    }
}

/// Re-encode 8-bit RGB or gray samples as PNG.
fn encode_raw_pixels(stream: &Stream, pixels: Vec<u8>) -> Option<Vec<u8>> {
    let dict = &stream.dict;
    let width = dict.get(b"Width").ok().and_then(as_number)? as u32;
    let height = dict.get(b"Height").ok().and_then(as_number)? as u32;
    let bits = dict.get(b"BitsPerComponent").ok().and_then(as_number).unwrap_or(8.0);
    if bits != 8.0 {
        return None;
    }
    let image = match dict.get(b"ColorSpace").ok().and_then(name_of)? {
        b"DeviceRGB" => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels)?),
        b"DeviceGray" => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, pixels)?),
        _ => return None,
    };
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).ok()?;
    Some(out.into_inner())
}

/// Images stored as `data:image/...;base64,` URIs anywhere in the bytes.
pub fn data_uri_images(raw: &[u8]) -> Vec<(Vec<u8>, ImageFormat)> {
    DATA_URI_RE
        .captures_iter(raw)
        .filter_map(|cap| {
            let payload: Vec<u8> = cap[2]
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(&payload)
                .ok()?;
            let format = format_of(&decoded)?;
            Some((decoded, format))
        })
        .collect()
}

/// Stage one: images the document describes itself, up to `limit`.
pub fn extract_structured(
    document: Option<&Document>,
    raw: &[u8],
    bounds: SizeBounds,
    limit: usize,
) -> Vec<(Vec<u8>, ImageFormat)> {
    let mut images: Vec<(Vec<u8>, ImageFormat)> = Vec::new();

    if let Some(document) = document {
        for object in document.objects.values() {
            if images.len() >= limit {
                break;
            }
            let Object::Stream(stream) = object else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .ok()
                .and_then(name_of)
                .map_or(false, |s| s == b"Image");
            if !is_image {
                continue;
            }
            if let Some((bytes, format)) = image_from_xobject(stream) {
                if bounds.accepts(bytes.len()) {
                    images.push((bytes, format));
                }
            }
        }
    }

    for (bytes, format) in data_uri_images(raw) {
        if images.len() >= limit {
            break;
        }
        if bounds.accepts(bytes.len()) && !images.iter().any(|(seen, _)| *seen == bytes) {
            images.push((bytes, format));
        }
    }
    images
}

/// Run both stages and select up to `max_images`, largest first.
pub fn carve(document: Option<&Document>, raw: &[u8], config: &PipelineConfig) -> Vec<ExtractedImage> {
    let bounds = SizeBounds::from_config(config);
    let limit = config.max_images;
    if limit == 0 {
        return Vec::new();
    }

    let mut found: Vec<(Vec<u8>, ImageFormat, ImageOrigin)> = extract_structured(document, raw, bounds, limit)
        .into_iter()
        .map(|(bytes, format)| (bytes, format, ImageOrigin::Structured))
        .collect();
    debug!("structured image extraction found {}", found.len());

    if found.is_empty() || config.exhaustive_image_scan {
        match scan_containers(raw, bounds) {
            Ok(candidates) => {
                for candidate in candidates {
                    let bytes = &raw[candidate.start..candidate.end];
                    if found.iter().any(|(seen, _, _)| seen.as_slice() == bytes) {
                        continue;
                    }
                    found.push((bytes.to_vec(), candidate.format, ImageOrigin::ByteScan));
                }
            }
            Err(e) => debug!("byte scan: {}", e),
        }
    }

    found.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    found.truncate(limit);
    if found.is_empty() {
        debug!("no embedded images recovered");
    } else {
        info!("recovered {} image(s)", found.len());
    }

    found
        .into_iter()
        .enumerate()
        .map(|(index, (bytes, format, origin))| ExtractedImage::new(bytes, format, origin, index))
        .collect()
}
