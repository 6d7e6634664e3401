// Hyperlink correlation: annotation rectangles + in-text URLs -> transcript offsets
//
// Annotation offsets are an approximation. The nearest fragment to the
// rectangle's lower-left corner fixes the line and the offset, which is
// computed against the structured transcript before being rebased onto
// whatever transcript the pipeline returns. The anchor text is every fragment
// on that line lying under the rectangle's horizontal span, so a label split
// into several runs ("Git" "Hub") is kept whole; the nearest fragment alone is
// used only when nothing lies under the span.
use log::debug;

use crate::pdf_extraction::layout::{group_lines, join_fragments, page_text, PAGE_SEPARATOR};
use crate::pdf_extraction::normalize::{normalize, LINK_RE};
use crate::types::{Hyperlink, LinkAnnotation, PageLayout, TextFragment};

/// Horizontal slack when deciding which fragments sit under a rectangle.
const X_SLOP: f64 = 2.0;
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];

/// Offsets of every annotation link against the structured transcript
/// (`layout::reconstruct` with the same tolerance).
pub fn correlate_annotations(pages: &[PageLayout], tolerance: f64) -> Vec<Hyperlink> {
    let mut links = Vec::new();
    let mut page_start = 0;

    for page in pages {
        for annotation in &page.links {
            match locate_in_page(page, annotation, tolerance) {
                Some((offset, anchor_text)) => links.push(Hyperlink {
                    url: annotation.uri.clone(),
                    page: Some(page.page),
                    offset: page_start + offset,
                    anchor_text,
                }),
                None => debug!(
                    "dropping link {} on page {}: no rectangle or text to anchor it",
                    annotation.uri, page.page
                ),
            }
        }
        page_start += page_text(&page.fragments, tolerance).len() + PAGE_SEPARATOR.len();
    }
    links
}

/// Offset within the page text plus anchor text for one annotation.
fn locate_in_page(
    page: &PageLayout,
    annotation: &LinkAnnotation,
    tolerance: f64,
) -> Option<(usize, String)> {
    let rect = annotation.rect?;
    // The rectangle's bottom edge sits on the text baseline.
    let (ax, ay) = (rect.x, rect.y + rect.h);
    let lines = group_lines(&page.fragments, tolerance);

    let mut best: Option<(f64, usize, &TextFragment)> = None;
    for (line_idx, line) in lines.iter().enumerate() {
        for fragment in &line.fragments {
            let distance = ((ax - fragment.x).powi(2) + (ay - fragment.y).powi(2)).sqrt();
            if best.map_or(true, |(d, _, _)| distance < d) {
                best = Some((distance, line_idx, *fragment));
            }
        }
    }
    let (_, line_idx, nearest) = best?;

    let mut offset: usize = lines[..line_idx].iter().map(|l| l.text().len() + 1).sum();

    let line = &lines[line_idx];
    let before = line
        .fragments
        .iter()
        .take_while(|f| f.x < rect.x - X_SLOP)
        .count();
    offset += match before {
        0 => 0,
        n if n == line.fragments.len() => line.text().len(),
        n => join_fragments(line.fragments[..n].iter().copied()).len() + 1,
    };

    let covered = line
        .fragments
        .iter()
        .copied()
        .filter(|f| f.x >= rect.x - X_SLOP && f.x <= rect.x + rect.w + X_SLOP);
    let anchor = join_fragments(covered);
    let anchor = if anchor.is_empty() {
        nearest.content.clone()
    } else {
        anchor
    };
    Some((offset, anchor))
}

/// Move offsets computed against `structured_len` bytes of layout text onto
/// `text`. The raw offset is scaled proportionally, then snapped to the
/// nearest occurrence of the anchor text when there is one.
pub fn rebase(links: Vec<Hyperlink>, structured_len: usize, text: &str) -> Vec<Hyperlink> {
    links
        .into_iter()
        .map(|mut link| {
            let projected = if structured_len == 0 {
                0
            } else {
                (link.offset as u128 * text.len() as u128 / structured_len as u128) as usize
            };
            // The transcript has been normalized; the anchor must be too.
            link.anchor_text = normalize(&link.anchor_text);
            let nearest_anchor = (!link.anchor_text.is_empty())
                .then(|| {
                    text.match_indices(link.anchor_text.as_str())
                        .map(|(pos, _)| pos)
                        .min_by_key(|pos| pos.abs_diff(projected))
                })
                .flatten();
            link.offset = nearest_anchor.unwrap_or_else(|| floor_char_boundary(text, projected));
            link
        })
        .collect()
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// URL-shaped substrings of the finished transcript. Offsets are exact.
pub fn scan_text(text: &str) -> Vec<Hyperlink> {
    LINK_RE
        .find_iter(text)
        .filter_map(|m| {
            let matched = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
            if matched.is_empty() {
                return None;
            }
            let lower = matched.to_ascii_lowercase();
            let url = if lower.starts_with("http://") || lower.starts_with("https://") {
                matched.to_string()
            } else if lower.starts_with("www.") {
                format!("https://{}", matched)
            } else {
                format!("mailto:{}", matched)
            };
            Some(Hyperlink {
                url,
                page: None,
                offset: m.start(),
                anchor_text: matched.to_string(),
            })
        })
        .collect()
}

fn comparable(url: &str) -> String {
    url.trim()
        .trim_end_matches('/')
        .trim_start_matches("mailto:")
        .to_ascii_lowercase()
}

fn same_target(a: &str, b: &str) -> bool {
    let (a, b) = (comparable(a), comparable(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Merge both sources into one offset-ordered list. A text match near an
/// annotation link to the same target is dropped in favour of the annotation.
pub fn merge(annotations: Vec<Hyperlink>, found_in_text: Vec<Hyperlink>, window: usize) -> Vec<Hyperlink> {
    let mut merged: Vec<Hyperlink> = Vec::with_capacity(annotations.len() + found_in_text.len());
    for link in annotations {
        if !merged
            .iter()
            .any(|seen| seen.offset == link.offset && seen.url == link.url)
        {
            merged.push(link);
        }
    }
    let annotation_count = merged.len();

    for link in found_in_text {
        let shadowed = merged[..annotation_count].iter().any(|a| {
            a.offset.abs_diff(link.offset) <= window
                && (same_target(&a.url, &link.anchor_text) || same_target(&a.url, &link.url))
        });
        if shadowed {
            debug!("text link {} at {} shadowed by annotation", link.url, link.offset);
        } else {
            merged.push(link);
        }
    }

    merged.sort_by_key(|link| link.offset);
    merged
}

/// Full correlation against the returned transcript.
pub fn correlate(pages: &[PageLayout], text: &str, tolerance: f64, window: usize) -> Vec<Hyperlink> {
    let structured_len = layout_len(pages, tolerance);
    let annotations = rebase(correlate_annotations(pages, tolerance), structured_len, text);
    merge(annotations, scan_text(text), window)
}

/// Byte length of the structured transcript for `pages`.
pub fn layout_len(pages: &[PageLayout], tolerance: f64) -> usize {
    let total: usize = pages
        .iter()
        .map(|p| page_text(&p.fragments, tolerance).len())
        .sum();
    total + PAGE_SEPARATOR.len() * pages.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_extraction::layout::reconstruct;
    use crate::types::{LinkRect, TextFragment};

    fn frag(x: f64, y: f64, s: &str) -> TextFragment {
        TextFragment::new(x, y, s)
    }

    fn link(page: u32, uri: &str, x: f64, y: f64, w: f64, h: f64) -> LinkAnnotation {
        LinkAnnotation {
            uri: uri.to_string(),
            page,
            rect: Some(LinkRect { x, y, w, h }),
        }
    }

    fn contact_page() -> PageLayout {
        let mut page = PageLayout::new(1);
        page.fragments = vec![
            frag(72.0, 100.0, "Jane Doe"),
            frag(72.0, 120.0, "Email:"),
            frag(120.0, 120.0, "Contact"),
            frag(180.0, 120.0, "https://x.test"),
        ];
        // Rectangle hugging "Contact": top at 110, baseline at 120.
        page.links = vec![link(1, "https://x.test", 119.0, 110.0, 50.0, 10.0)];
        page
    }

    #[test]
    fn test_annotation_offset_follows_layout() {
        let pages = vec![contact_page()];
        let text = reconstruct(&pages, 0.5);
        assert_eq!(text, "Jane Doe\nEmail: Contact https://x.test");

        let links = correlate_annotations(&pages, 0.5);
        assert_eq!(links.len(), 1);
        let expected = "Jane Doe\nEmail: ".len();
        assert_eq!(links[0].offset, expected);
        assert_eq!(&text[links[0].offset..links[0].offset + 7], "Contact");
        assert_eq!(links[0].anchor_text, "Contact");
        assert_eq!(links[0].page, Some(1));
    }

    #[test]
    fn test_anchor_spans_every_run_under_rectangle() {
        let mut page = PageLayout::new(1);
        page.fragments = vec![
            frag(72.0, 120.0, "Code:"),
            frag(120.0, 120.0, "Git"),
            frag(140.0, 120.0, "Hub"),
            frag(220.0, 120.0, "profile"),
        ];
        page.links = vec![link(1, "https://github.com/jane", 119.0, 110.0, 40.0, 10.0)];

        let links = correlate_annotations(&[page], 0.5);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].anchor_text, "Git Hub");
        assert_eq!(links[0].offset, "Code: ".len());
    }

    #[test]
    fn test_regex_duplicate_is_dropped_near_annotation() {
        let pages = vec![contact_page()];
        let text = reconstruct(&pages, 0.5);
        let links = correlate(&pages, &text, 0.5, 10);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://x.test");
        assert_eq!(links[0].page, Some(1));
        assert_eq!(links[0].offset, "Jane Doe\nEmail: ".len());
    }

    #[test]
    fn test_regex_match_far_away_survives() {
        let annotation = Hyperlink {
            url: "https://x.test".into(),
            page: Some(1),
            offset: 0,
            anchor_text: "Contact".into(),
        };
        let far = Hyperlink {
            url: "https://x.test".into(),
            page: None,
            offset: 40,
            anchor_text: "https://x.test".into(),
        };
        let merged = merge(vec![annotation], vec![far], 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].page, None);
    }

    #[test]
    fn test_offsets_account_for_prior_pages() {
        let mut first = PageLayout::new(1);
        first.fragments = vec![frag(0.0, 0.0, "Page one text")];
        let mut second = PageLayout::new(2);
        second.fragments = vec![frag(0.0, 10.0, "Portfolio")];
        second.links = vec![link(2, "https://port.test", 0.0, 0.0, 40.0, 10.0)];
        let pages = vec![first, second];

        let text = reconstruct(&pages, 0.5);
        let links = correlate_annotations(&pages, 0.5);
        assert_eq!(links[0].offset, "Page one text\n\n".len());
        assert!(text[links[0].offset..].starts_with("Portfolio"));
    }

    #[test]
    fn test_unresolvable_annotations_are_dropped() {
        let mut page = PageLayout::new(1);
        page.links = vec![link(1, "https://empty.test", 0.0, 0.0, 10.0, 10.0)];
        let mut other = contact_page();
        other.page = 2;
        other.links.push(LinkAnnotation {
            uri: "https://norect.test".into(),
            page: 2,
            rect: None,
        });
        let links = correlate_annotations(&[page, other], 0.5);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://x.test");
    }

    #[test]
    fn test_scan_text_shapes() {
        let links = scan_text("Mail me@site.dev, see www.site.dev. Or https://a.test/x).");
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["mailto:me@site.dev", "https://www.site.dev", "https://a.test/x"]
        );
        assert_eq!(links[0].offset, 5);
        assert_eq!(links[1].anchor_text, "www.site.dev");
        assert!(links.iter().all(|l| l.page.is_none()));
    }

    #[test]
    fn test_rebase_snaps_to_anchor() {
        let raw = Hyperlink {
            url: "https://x.test".into(),
            page: Some(1),
            offset: 20,
            anchor_text: "Contact".into(),
        };
        // Whitespace collapsed by normalisation shifts the anchor left.
        let text = "Jane Doe\nEmail: Contact https://x.test";
        let rebased = rebase(vec![raw], 44, text);
        assert_eq!(rebased[0].offset, text.find("Contact").unwrap());
    }

    #[test]
    fn test_rebase_normalizes_camel_case_anchor() {
        let raw = |offset: usize, anchor: &str| Hyperlink {
            url: format!("https://{}.test", anchor.to_lowercase()),
            page: Some(1),
            offset,
            anchor_text: anchor.into(),
        };
        let structured = "Jane Doe\nProfiles:\nLinkedIn\nGitHub";
        let text = "Jane Doe\nProfiles:\nLinked In\nGit Hub";
        let links = vec![
            raw(structured.find("LinkedIn").unwrap(), "LinkedIn"),
            raw(structured.find("GitHub").unwrap(), "GitHub"),
        ];
        let rebased = rebase(links, structured.len(), text);

        assert_eq!(rebased[0].anchor_text, "Linked In");
        assert_eq!(rebased[0].offset, text.find("Linked In").unwrap());
        assert_eq!(rebased[1].anchor_text, "Git Hub");
        assert_eq!(rebased[1].offset, text.find("Git Hub").unwrap());
        for link in &rebased {
            assert!(text[link.offset..].starts_with(&link.anchor_text));
        }
    }

    #[test]
    fn test_rebase_without_anchor_stays_in_bounds() {
        let raw = Hyperlink {
            url: "https://x.test".into(),
            page: Some(1),
            offset: 500,
            anchor_text: "missing".into(),
        };
        let text = "short é text";
        let rebased = rebase(vec![raw], 100, text);
        assert!(rebased[0].offset <= text.len());
        assert!(text.is_char_boundary(rebased[0].offset));
    }

    #[test]
    fn test_offsets_always_index_the_transcript() {
        let pages = vec![contact_page()];
        let text = "Jane Doe Email: Contact https://x.test and www.other.test";
        for link in correlate(&pages, text, 0.5, 10) {
            assert!(link.offset <= text.len());
        }
    }

    #[test]
    fn test_correlation_is_deterministic() {
        let pages = vec![contact_page()];
        let text = reconstruct(&pages, 0.5);
        assert_eq!(correlate(&pages, &text, 0.5, 10), correlate(&pages, &text, 0.5, 10));
    }

    #[test]
    fn test_layout_len_matches_reconstruction() {
        let mut second = contact_page();
        second.page = 2;
        let pages = vec![contact_page(), second];
        assert_eq!(layout_len(&pages, 0.5), reconstruct(&pages, 0.5).len());
    }
}
