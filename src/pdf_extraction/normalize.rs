// Transcript cleanup applied once to whichever strategy wins
use once_cell::sync::Lazy;
use regex::Regex;

/// URL-shaped spans: `http(s)://`, `www.`, bare email addresses.
pub static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bhttps?://[^\s<>"'()\[\]]+|\bwww\.[^\s<>"'()\[\]]+|\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"#,
    )
    .unwrap()
});

static INLINE_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x{00A0}]+").unwrap());
// Three or more blank lines become one; one or two are kept as written.
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());
static LOWER_UPPER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static DIGIT_UPPER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9])([A-Z])").unwrap());

pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| *c != '\u{00AD}' && (!c.is_control() || *c == '\n' || *c == '\t'))
        .collect();

    let lines: Vec<String> = cleaned
        .lines()
        .map(|line| INLINE_WS_RE.replace_all(line, " ").trim_end().to_string())
        .collect();
    let joined = BLANK_RUN_RE.replace_all(&lines.join("\n"), "\n\n").into_owned();

    restore_word_breaks(&joined).trim().to_string()
}

/// Re-insert spaces lost between glyph runs (`fooBar`, `2024Resume`),
/// leaving URLs and email addresses untouched.
pub fn restore_word_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for link in LINK_RE.find_iter(text) {
        out.push_str(&split_glued(&text[last..link.start()]));
        out.push_str(link.as_str());
        last = link.end();
    }
    out.push_str(&split_glued(&text[last..]));
    out
}

fn split_glued(span: &str) -> String {
    let step = LOWER_UPPER_RE.replace_all(span, "$1 $2");
    DIGIT_UPPER_RE.replace_all(&step, "$1 $2").into_owned()
}
