//! Removal of structural boilerplate before fingerprinting.
//!
//! Uploaded works carry a cover page, a table of contents and appendices that
//! are shared between unrelated documents (institution names, section
//! headings, standard forms). They are detected heuristically and cut out.
//! Detection favours false negatives: whenever a rule is unsure, text is left
//! alone. Input may be line-structured or already whitespace-collapsed by the
//! text extractor, so no rule depends on line breaks.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

lazy_static! {
    static ref BODY_START: Regex = Regex::new(
        r"\b(?:ВВЕДЕНИЕ|INTRODUCTION|Introduction|РЕФЕРАТ|АННОТАЦИЯ|ABSTRACT|Abstract|СОДЕРЖАНИЕ|ОГЛАВЛЕНИЕ|TABLE OF CONTENTS|Table of Contents|CONTENTS|Contents)\b"
    )
    .expect("valid regex");
    static ref TITLE_CUES: Regex = Regex::new(
        r"(?i)министерств|университет|university|институт|institute|академи|academy|кафедр|department|факультет|faculty|выполнил|проверил|руководител|supervisor|submitted by|курсов|дипломн|thesis|пояснительная записка|\b(?:19|20)\d{2}\b"
    )
    .expect("valid regex");
    static ref TOC_HEADING: Regex = Regex::new(
        r"\b(?:СОДЕРЖАНИЕ|ОГЛАВЛЕНИЕ|TABLE OF CONTENTS|Table of Contents|CONTENTS|Contents)\b"
    )
    .expect("valid regex");
    // One TOC line: optional section number, a heading without sentence
    // punctuation, a dot leader or space, a page number.
    static ref TOC_ENTRY: Regex = Regex::new(
        r"^\s*(\d+(?:\.\d+)*\.?\s+)?(\p{L}[^\n.,;:!?]{0,80}?)(?:\s*(?:\.{2,}|…+)\s*|\s+)(\d{1,3})(?:\s|$)"
    )
    .expect("valid regex");
    static ref APPENDIX: Regex = Regex::new(
        r"\b(?:ПРИЛОЖЕНИЯ|ПРИЛОЖЕНИЕ|APPENDICES|APPENDIX|Appendix\s+[A-Z1-9]|Приложение\s+[А-Я1-9])\b"
    )
    .expect("valid regex");
}

/// Cover pages longer than this are not recognised.
const TITLE_PAGE_MAX_CHARS: usize = 4000;
const TITLE_PAGE_MIN_WINDOW: usize = 1500;
const TITLE_CUES_REQUIRED: usize = 2;
/// A run of entries longer than this is not a table of contents.
const TOC_MAX_ENTRIES: usize = 80;
const TOC_MAX_BYTES: usize = 6000;
/// Output below this share of the input's non-whitespace chars is treated as a
/// misdetection.
const MIN_KEPT_RATIO: f64 = 0.2;

/// Strip the cover page, table of contents and trailing appendices.
///
/// Never fails; text without recognisable boilerplate comes back trimmed but
/// otherwise unchanged. The result is never longer than the input.
pub fn normalize(raw: &str) -> String {
    let input = raw.trim();
    if input.is_empty() {
        return String::new();
    }
    let text = strip_title_page(input);
    let text = strip_table_of_contents(text);
    let text = strip_appendices(&text);
    let text = text.trim();

    if (dense_len(text) as f64) < dense_len(input) as f64 * MIN_KEPT_RATIO {
        tracing::debug!("boilerplate detection removed too much; keeping input");
        return input.to_string();
    }
    text.to_string()
}

fn dense_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn strip_title_page(text: &str) -> &str {
    let window = (text.len() / 3).max(TITLE_PAGE_MIN_WINDOW).min(TITLE_PAGE_MAX_CHARS);
    let Some(m) = BODY_START.find(text) else {
        return text;
    };
    if m.start() == 0 || m.start() > window {
        return text;
    }
    let prefix = &text[..m.start()];
    if TITLE_CUES.find_iter(prefix).count() >= TITLE_CUES_REQUIRED {
        &text[m.start()..]
    } else {
        text
    }
}

fn strip_table_of_contents(text: &str) -> String {
    let Some(heading) = TOC_HEADING.find(text) else {
        return text.to_string();
    };
    if (heading.start() as f64) > text.len() as f64 * 0.3 {
        return text.to_string();
    }

    let Some(first) = toc_entry(text, heading.end()) else {
        return text.to_string();
    };
    if !followed_by_entry(text, first.end) {
        return text.to_string();
    }
    if let Some(body_start) = find_heading_reappearance(text, first.name, first.end) {
        return splice(text, heading.start(), body_start);
    }

    // No reappearance: drop the run of consecutive entries instead. Page
    // numbers never decrease and each entry is followed by another one.
    let mut run_end = first.end;
    let mut page = first.page;
    let mut entries = 1;
    while let Some(entry) = toc_entry(text, run_end) {
        if entry.page < page || !followed_by_entry(text, entry.end) {
            break;
        }
        run_end = entry.end;
        page = entry.page;
        entries += 1;
        if entries > TOC_MAX_ENTRIES || run_end - heading.start() > TOC_MAX_BYTES {
            tracing::debug!(entries, "table of contents run too long; keeping text");
            return text.to_string();
        }
    }
    if entries < 2 {
        return text.to_string();
    }
    splice(text, heading.start(), run_end)
}

struct TocEntry<'a> {
    name: &'a str,
    page: u32,
    /// Byte offset just past the entry.
    end: usize,
}

/// Parse one TOC entry at `from`. Unnumbered headings must be capitalised.
fn toc_entry(text: &str, from: usize) -> Option<TocEntry<'_>> {
    let caps = TOC_ENTRY.captures(&text[from..])?;
    let whole = caps.get(0)?;
    let name = caps.get(2)?.as_str().trim();
    let numbered = caps.get(1).is_some();
    if !numbered && !name.chars().next().is_some_and(char::is_uppercase) {
        return None;
    }
    let page = caps.get(3)?.as_str().parse().ok()?;
    Some(TocEntry { name, page, end: from + whole.end() })
}

/// True when the page number ending at `at` is followed by a line break, the
/// end of the text or the start of another entry.
fn followed_by_entry(text: &str, at: usize) -> bool {
    if text[..at].ends_with('\n') {
        return true;
    }
    match text[at..].chars().find(|c| *c == '\n' || !c.is_whitespace()) {
        None | Some('\n') => true,
        Some(c) => c.is_uppercase() || c.is_ascii_digit(),
    }
}

/// Position where the first listed heading shows up again as an actual
/// heading, i.e. not directly followed by a page number.
fn find_heading_reappearance(text: &str, name: &str, from: usize) -> Option<usize> {
    if name.chars().count() < 4 {
        return None;
    }
    let escaped = regex::escape(name);
    let heading = RegexBuilder::new(&format!(r"\b{escaped}\b"))
        .case_insensitive(true)
        .build()
        .ok()?;
    let listed = RegexBuilder::new(&format!(r"^{escaped}(?:\s*(?:\.{{2,}}|…+)\s*|\s+)\d{{1,3}}(?:\s|$)"))
        .case_insensitive(true)
        .build()
        .ok()?;
    let found = heading
        .find_iter(&text[from..])
        .map(|m| from + m.start())
        .find(|&pos| !listed.is_match(&text[pos..]));
    found
}

fn splice(text: &str, cut_start: usize, cut_end: usize) -> String {
    let mut out = String::with_capacity(text.len() - (cut_end - cut_start));
    out.push_str(text[..cut_start].trim_end());
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(text[cut_end..].trim_start());
    out
}

fn strip_appendices(text: &str) -> String {
    let half = text.len() / 2;
    match APPENDIX.find_iter(text).find(|m| m.start() >= half) {
        Some(m) => text[..m.start()].trim_end().to_string(),
        None => text.to_string(),
    }
}
