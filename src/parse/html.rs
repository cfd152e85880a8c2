//! HTML parsing and text extraction

use super::{collapse_whitespace, normalize_whitespace, parse_timestamp};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// Best-effort view of a single article page
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    /// Text of the primary content block
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Extract title, primary text and publish time from a page.
///
/// The primary block is the element whose direct `<p>` children carry the
/// most text. Pages without paragraphs fall back to `article`, `main`, then
/// `body`.
pub fn extract_page(content: &str) -> ExtractedPage {
    let document = Html::parse_document(content);

    ExtractedPage {
        title: extract_title(&document),
        text: extract_primary_text(&document, content),
        published_at: extract_published(&document),
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    select_first(document, selector)
        .and_then(|e| e.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn extract_title(document: &Html) -> Option<String> {
    if let Some(title) = meta_content(document, r#"meta[property="og:title"]"#) {
        return Some(title);
    }

    for selector in ["title", "h1"] {
        if let Some(text) = select_first(document, selector)
            .map(element_text)
            .filter(|t| !t.is_empty())
        {
            return Some(text);
        }
    }

    None
}

fn extract_primary_text(document: &Html, content: &str) -> String {
    let Ok(p_selector) = Selector::parse("p") else {
        return extract_text_from_html(content);
    };

    // Containers in document order of their first paragraph; ties go to the
    // earliest
    let mut containers: Vec<(ElementRef<'_>, usize)> = Vec::new();
    let mut slots = HashMap::new();
    for paragraph in document.select(&p_selector) {
        let len = element_text(paragraph).chars().count();
        if len == 0 {
            continue;
        }
        let Some(parent) = paragraph.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let slot = *slots.entry(parent.id()).or_insert_with(|| {
            containers.push((parent, 0));
            containers.len() - 1
        });
        containers[slot].1 += len;
    }

    let mut best: Option<(ElementRef<'_>, usize)> = None;
    for (container, score) in containers {
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((container, score));
        }
    }

    if let Some((container, _)) = best {
        let text = extract_text_from_html(&container.html());
        if !text.is_empty() {
            return text;
        }
    }

    for selector in ["article", "main", "body"] {
        if let Some(element) = select_first(document, selector) {
            let text = extract_text_from_html(&element.html());
            if !text.is_empty() {
                return text;
            }
        }
    }

    extract_text_from_html(content)
}

fn extract_published(document: &Html) -> Option<DateTime<Utc>> {
    for selector in [
        r#"meta[property="article:published_time"]"#,
        r#"meta[itemprop="datePublished"]"#,
        r#"meta[name="date"]"#,
    ] {
        if let Some(ts) = meta_content(document, selector).and_then(|v| parse_timestamp(&v)) {
            return Some(ts);
        }
    }

    select_first(document, "time[datetime]")
        .and_then(|e| e.value().attr("datetime"))
        .and_then(parse_timestamp)
}

/// Extract just the text content from HTML (simpler version)
pub fn extract_text_from_html(content: &str) -> String {
    let text = html2text::from_read(content.as_bytes(), 80).unwrap_or_else(|_| content.to_string());
    normalize_whitespace(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_primary_block_wins_over_chrome() {
        let html = r#"
        <html>
        <head><title>Interview with Jane | Example News</title></head>
        <body>
            <nav><p>Home</p><p>About</p></nav>
            <div class="story">
                <h1>Interview with Jane</h1>
                <p>Jane talks about building models that reason over long documents.</p>
                <p>She expects agents to reshape how small teams ship software.</p>
            </div>
            <footer><p>Copyright 2024</p></footer>
        </body>
        </html>
        "#;

        let page = extract_page(html);
        assert_eq!(
            page.title.as_deref(),
            Some("Interview with Jane | Example News")
        );
        assert!(page.text.contains("long documents"));
        assert!(page.text.contains("small teams"));
        assert!(!page.text.contains("Copyright"));
        assert!(page.published_at.is_none());
    }

    #[test]
    fn test_og_title_preferred() {
        let html = r#"
        <html><head>
            <meta property="og:title" content="  The Real   Title ">
            <title>Site | The Real Title</title>
        </head><body><p>Body</p></body></html>
        "#;
        assert_eq!(extract_page(html).title.as_deref(), Some("The Real Title"));
    }

    #[test]
    fn test_h1_title_fallback_and_body_fallback() {
        let html = "<html><body><h1>Only Heading</h1><div>Loose text without paragraphs</div></body></html>";
        let page = extract_page(html);
        assert_eq!(page.title.as_deref(), Some("Only Heading"));
        assert!(page.text.contains("Loose text"));
    }

    #[test]
    fn test_published_time_from_meta_and_time() {
        let html = r#"<html><head>
            <meta property="article:published_time" content="2024-03-02T10:00:00+00:00">
        </head><body><p>x</p></body></html>"#;
        assert_eq!(
            extract_page(html).published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap())
        );

        let html = r#"<html><body><time datetime="2024-03-04">March 4</time><p>x</p></body></html>"#;
        assert_eq!(
            extract_page(html).published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_extract_text_simple() {
        let html = "<html><body><p>Hello <strong>world</strong>!</p></body></html>";
        let text = extract_text_from_html(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
    }

    #[test]
    fn test_equal_blocks_pick_the_first() {
        let html = r#"<html><body>
            <div class="lead"><p>Alpha block text.</p></div>
            <div class="aside"><p>Omega block text.</p></div>
        </body></html>"#;

        for _ in 0..5 {
            let page = extract_page(html);
            assert!(page.text.contains("Alpha"));
            assert!(!page.text.contains("Omega"));
        }
    }
}
