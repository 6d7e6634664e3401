// Line reconstruction from positioned text fragments
use std::cmp::Ordering;

use crate::types::{PageLayout, TextFragment};

/// Fragments sharing a vertical band, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Line<'a> {
    pub y: f64,
    pub fragments: Vec<&'a TextFragment>,
}

impl<'a> Line<'a> {
    pub fn text(&self) -> String {
        join_fragments(self.fragments.iter().copied())
    }
}

pub fn join_fragments<'a>(fragments: impl Iterator<Item = &'a TextFragment>) -> String {
    fragments
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cluster fragments into lines.
///
/// A fragment joins the first cluster whose key is within `tolerance` of its
/// `y`, otherwise it opens a new cluster keyed by its own `y`. Clusters are
/// ordered by ascending key and fragments by ascending `x`; both sorts are
/// stable so ties keep input order.
pub fn group_lines(fragments: &[TextFragment], tolerance: f64) -> Vec<Line<'_>> {
    let mut clusters: Vec<Line> = Vec::new();

    for fragment in fragments {
        match clusters
            .iter_mut()
            .find(|line| (line.y - fragment.y).abs() <= tolerance)
        {
            Some(line) => line.fragments.push(fragment),
            None => clusters.push(Line {
                y: fragment.y,
                fragments: vec![fragment],
            }),
        }
    }

    clusters.sort_by(|a, b| a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal));
    for line in &mut clusters {
        line.fragments
            .sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    }
    clusters
}

/// A page's contribution to the transcript: lines joined with `\n`.
pub fn page_text(fragments: &[TextFragment], tolerance: f64) -> String {
    group_lines(fragments, tolerance)
        .iter()
        .map(Line::text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Separator between pages in the transcript (one blank line).
pub const PAGE_SEPARATOR: &str = "\n\n";

/// The structured transcript for a whole document.
pub fn reconstruct(pages: &[PageLayout], tolerance: f64) -> String {
    pages
        .iter()
        .map(|page| page_text(&page.fragments, tolerance))
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(x: f64, y: f64, s: &str) -> TextFragment {
        TextFragment::new(x, y, s)
    }

    #[test]
    fn test_hello_world() {
        let fragments = vec![frag(0.0, 0.0, "Hello"), frag(40.0, 0.0, "World")];
        assert_eq!(page_text(&fragments, 0.5), "Hello World");
    }

    #[test]
    fn test_lines_sorted_top_down_and_left_right() {
        let fragments = vec![
            frag(50.0, 20.0, "second"),
            frag(0.0, 10.0, "first"),
            frag(0.0, 20.3, "line"),
            frag(30.0, 10.2, "row"),
        ];
        assert_eq!(page_text(&fragments, 0.5), "first row\nline second");
    }

    #[test]
    fn test_tolerance_splits_bands() {
        let fragments = vec![frag(0.0, 0.0, "a"), frag(10.0, 0.6, "b")];
        assert_eq!(page_text(&fragments, 0.5), "a\nb");
        assert_eq!(page_text(&fragments, 1.0), "a b");
    }

    #[test]
    fn test_first_matching_cluster_wins() {
        // 0.4 is within tolerance of both 0.0 and 0.8; it joins the first one opened.
        let fragments = vec![
            frag(0.0, 0.0, "a"),
            frag(0.0, 0.8, "c"),
            frag(5.0, 0.4, "b"),
        ];
        let lines = group_lines(&fragments, 0.5);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "a b");
        assert_eq!(lines[1].text(), "c");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let fragments = vec![frag(5.0, 0.0, "x"), frag(5.0, 0.0, "y"), frag(5.0, 0.0, "z")];
        assert_eq!(page_text(&fragments, 0.5), "x y z");
    }

    #[test]
    fn test_reconstruct_separates_pages() {
        let mut first = PageLayout::new(1);
        first.fragments.push(frag(0.0, 0.0, "one"));
        let mut second = PageLayout::new(2);
        second.fragments.push(frag(0.0, 0.0, "two"));
        assert_eq!(reconstruct(&[first, second], 0.5), "one\n\ntwo");
    }

    #[test]
    fn test_empty_page() {
        assert_eq!(page_text(&[], 0.5), "");
    }
}
