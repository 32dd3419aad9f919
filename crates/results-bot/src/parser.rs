/// Parsers for the two external pages the bot reads.
///
/// Results listing: a `div.wrapper` container holding anchors whose visible text is a
/// dash-separated description such as `B.Tech-IV-II-R20-Regular-May-2024`. Anchors with
/// no href, no text, or fewer than four tokens are skipped.
///
/// Exam portal: `#ugc-pro3 div.container` holding `li` notices with a download anchor.
///
/// Both parsers treat the markup as untrusted: anything that does not fit is skipped and
/// the parser never panics.
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::model::{ResultEntry, TimetableNotice};
use crate::normalize::roman_to_arabic;

const MIN_LISTING_TOKENS: usize = 4;

static WRAPPER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.wrapper").expect("valid selector"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("valid selector"));
static TIMETABLE_CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#ugc-pro3 div.container").expect("valid selector"));
static LIST_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li").expect("valid selector"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Parse the results portal listing into entries, in page order.
///
/// Relative hrefs are resolved against `base`. Year (token 1) and semester (token 2)
/// are converted from roman numerals where they are I to IV.
pub fn parse_listing(html: &str, base: &Url) -> Vec<ResultEntry> {
    let document = Html::parse_document(html);
    let Some(wrapper) = document.select(&WRAPPER).next() else {
        warn!("listing has no div.wrapper container");
        return Vec::new();
    };

    let mut entries = Vec::new();
    for anchor in wrapper.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let name = stripped_text(&anchor);
        if name.is_empty() {
            continue;
        }

        let mut parts: Vec<String> = name.split('-').map(|p| p.trim().to_string()).collect();
        if parts.len() < MIN_LISTING_TOKENS {
            debug!(name, "skipping listing row with too few tokens");
            continue;
        }
        for idx in [1, 2] {
            parts[idx] = roman_to_arabic(&parts[idx]).into_owned();
        }

        let target_link = match base.join(href) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!(error = %e, href, "skipping listing row with unusable link");
                continue;
            }
        };

        entries.push(ResultEntry {
            display_text: parts.join("-"),
            target_link,
            normalized_parts: parts,
        });
    }
    entries
}

/// Parse the exam portal page into notices mentioning `regulation`, stopping after `limit`.
///
/// Links are resolved against `base`; spaces in file names come back percent-encoded.
pub fn parse_timetable(
    html: &str,
    base: &Url,
    regulation: &str,
    limit: usize,
) -> Vec<TimetableNotice> {
    let document = Html::parse_document(html);
    let Some(container) = document.select(&TIMETABLE_CONTAINER).next() else {
        warn!("exam portal page has no #ugc-pro3 container");
        return Vec::new();
    };

    let mut notices = Vec::new();
    for item in container.select(&LIST_ITEM) {
        if notices.len() >= limit {
            break;
        }
        let title = collapse_whitespace(&item.text().collect::<String>());
        if !title.contains(regulation) {
            continue;
        }
        let Some(href) = item
            .select(&ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())
        else {
            continue;
        };
        let Ok(link) = base.join(href) else {
            warn!(href, "skipping timetable notice with unusable link");
            continue;
        };
        notices.push(TimetableNotice {
            title,
            link: link.to_string(),
        });
    }
    notices
}

/// Pull `label: value` pairs out of rendered result text.
///
/// Accepts `Label: Value` lines and two-cell tab-separated rows. Lines that fit neither
/// shape are ignored.
pub fn extract_labeled_fields(text: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let pair = line.split_once(':').or_else(|| {
            let cells: Vec<&str> = line.split('\t').filter(|c| !c.trim().is_empty()).collect();
            match cells.as_slice() {
                [label, value] => Some((*label, *value)),
                _ => None,
            }
        });
        let Some((label, value)) = pair else {
            continue;
        };
        let (label, value) = (collapse_whitespace(label), collapse_whitespace(value));
        if label.is_empty() || value.is_empty() {
            continue;
        }
        fields.push((label, value));
    }
    fields
}

fn stripped_text(element: &ElementRef<'_>) -> String {
    element.text().map(str::trim).collect::<Vec<_>>().concat()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://portal.test/mitsresults/resultug").unwrap()
    }

    #[test]
    fn test_parse_listing_normalizes_roman_tokens() {
        let html = r#"<html><body><div class="wrapper">
            <a href="view?id=1">B.Tech-IV-II-R20-Regular-May-2024</a>
            <a href="/abs/view?id=2"> B.Tech - III - I - R23 - Supplementary </a>
        </div></body></html>"#;

        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].display_text, "B.Tech-4-2-R20-Regular-May-2024");
        assert_eq!(entries[0].target_link, "http://portal.test/mitsresults/view?id=1");
        assert_eq!(entries[0].normalized_parts[1], "4");
        assert_eq!(entries[0].normalized_parts[2], "2");

        assert_eq!(entries[1].display_text, "B.Tech-3-1-R23-Supplementary");
        assert_eq!(entries[1].target_link, "http://portal.test/abs/view?id=2");
    }

    #[test]
    fn test_parse_listing_skips_malformed_rows() {
        let html = r#"<div class="wrapper">
            <a href="a">B.Tech-3-1</a>
            <a>B.Tech-3-1-R20-Regular</a>
            <a href="">B.Tech-3-1-R20-Regular</a>
            <a href="c"></a>
            <a href="d">B.Tech-3-1-R20-Regular-2024</a>
        </div>"#;

        let entries = parse_listing(html, &base());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_text, "B.Tech-3-1-R20-Regular-2024");
    }

    #[test]
    fn test_parse_listing_preserves_page_order() {
        let html = r#"<div class="wrapper">
            <a href="z">B.Tech-3-1-R20-Supplementary-2024</a>
            <a href="a">B.Tech-3-1-R20-Regular-2023</a>
            <a href="m">B.Tech-3-1-R20-Regular-2024</a>
        </div>"#;

        let texts: Vec<String> = parse_listing(html, &base())
            .into_iter()
            .map(|e| e.display_text)
            .collect();
        assert_eq!(
            texts,
            [
                "B.Tech-3-1-R20-Supplementary-2024",
                "B.Tech-3-1-R20-Regular-2023",
                "B.Tech-3-1-R20-Regular-2024",
            ]
        );
    }

    #[test]
    fn test_parse_listing_without_wrapper_is_empty() {
        let html = r#"<div class="content"><a href="x">B.Tech-3-1-R20-Regular</a></div>"#;
        assert!(parse_listing(html, &base()).is_empty());
        assert!(parse_listing("not html at all", &base()).is_empty());
    }

    #[test]
    fn test_parse_timetable_filters_and_encodes() {
        let html = r#"<div id="ugc-pro3"><div class="container"><ul>
            <li><a href="https://mits.test/f/R20 III.pdf">R20 III B.Tech I Sem   timetable</a></li>
            <li><a href="/files/r23.pdf">R23 I B.Tech timetable</a></li>
            <li>R20 notice without a link</li>
        </ul></div></div>"#;
        let base = Url::parse("https://mits.test/exam-portal#ugc-pro3").unwrap();

        let notices = parse_timetable(html, &base, "R20", 10);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "R20 III B.Tech I Sem timetable");
        assert_eq!(
            notices[0].link,
            "https://mits.test/f/R20%20III.pdf"
        );

        let r23 = parse_timetable(html, &base, "R23", 10);
        assert_eq!(r23[0].link, "https://mits.test/files/r23.pdf");
    }

    #[test]
    fn test_parse_timetable_caps_matches() {
        let items: String = (0..15)
            .map(|i| format!(r#"<li><a href="/f{i}.pdf">R20 notice {i}</a></li>"#))
            .collect();
        let html =
            format!(r#"<div id="ugc-pro3"><div class="container"><ul>{items}</ul></div></div>"#);
        let base = Url::parse("https://mits.test/").unwrap();

        let notices = parse_timetable(&html, &base, "R20", 10);
        assert_eq!(notices.len(), 10);
        assert_eq!(notices[9].title, "R20 notice 9");
    }

    #[test]
    fn test_extract_labeled_fields() {
        let text = "Hall Ticket No: 21X51A0501\nName :  A  STUDENT\nSGPA\t8.42\n\
                    Subject Code Grade\n:orphan\n";
        let fields = extract_labeled_fields(text);
        assert_eq!(
            fields,
            vec![
                ("Hall Ticket No".to_string(), "21X51A0501".to_string()),
                ("Name".to_string(), "A STUDENT".to_string()),
                ("SGPA".to_string(), "8.42".to_string()),
            ]
        );
    }
}
