//! Parsed HTML page handed to page processors
//!
//! `scraper::Html` is not `Send`, so a `Document` is built, processed and
//! dropped without crossing an `.await`.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// A CSS selector that scraper refused to parse
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid CSS selector '{selector}': {message}")]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

/// Parses a CSS selector, keeping the offending text in the error
pub fn parse_selector(selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError {
        selector: selector.to_string(),
        message: format!("{e:?}"),
    })
}

/// An HTML page together with the URL it was fetched from
pub struct Document {
    html: Html,
    url: Url,
}

impl Document {
    /// Parses `body` as a full HTML document
    ///
    /// # Example
    ///
    /// ```
    /// use lurker::crawler::Document;
    /// use url::Url;
    ///
    /// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
    /// let doc = Document::parse(html, Url::parse("https://example.com/").unwrap());
    /// assert_eq!(doc.select("a").unwrap().len(), 1);
    /// assert_eq!(doc.resolve("/page"), Some("https://example.com/page".to_string()));
    /// ```
    pub fn parse(body: &str, url: Url) -> Self {
        Self {
            html: Html::parse_document(body),
            url,
        }
    }

    /// URL the page was fetched from, used as the base for relative links
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// All elements matching `selector`, in document order
    pub fn select(&self, selector: &str) -> Result<Vec<ElementRef<'_>>, SelectorError> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).collect())
    }

    /// First element matching `selector`
    pub fn select_first(&self, selector: &str) -> Result<Option<ElementRef<'_>>, SelectorError> {
        let selector = parse_selector(selector)?;
        Ok(self.html.select(&selector).next())
    }

    /// Resolves `href` against the page URL
    pub fn resolve(&self, href: &str) -> Option<String> {
        resolve_link(href, &self.url)
    }

    /// Resolves the `attr` attribute of `element` against the page URL
    pub fn resolve_attr(&self, element: &ElementRef<'_>, attr: &str) -> Option<String> {
        element.value().attr(attr).and_then(|v| self.resolve(v))
    }
}

/// Elements below `element` matching `selector`
pub fn select_in<'a>(
    element: &ElementRef<'a>,
    selector: &str,
) -> Result<Vec<ElementRef<'a>>, SelectorError> {
    let selector = parse_selector(selector)?;
    Ok(element.select(&selector).collect())
}

/// First element below `element` matching `selector`
pub fn select_first_in<'a>(
    element: &ElementRef<'a>,
    selector: &str,
) -> Result<Option<ElementRef<'a>>, SelectorError> {
    let selector = parse_selector(selector)?;
    Ok(element.select(&selector).next())
}

/// Text content with whitespace runs collapsed to single spaces
pub fn text_of(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("https://forum.example.org/index.php").unwrap()
    }

    #[test]
    fn test_text_collapses_whitespace() {
        let html = r#"<html><body><h4 class="nick">  Test   Page  </h4></body></html>"#;
        let doc = Document::parse(html, base_url());
        let nick = doc.select_first("h4.nick").unwrap().unwrap();
        assert_eq!(text_of(&nick), "Test Page");
        assert!(doc.select_first("title").unwrap().is_none());
    }

    #[test]
    fn test_select_and_nested_select() {
        let html = r#"
            <div class="board"><a class="info_text" href="?board=1.0"><span class="subject">General</span></a></div>
            <div class="board"><a class="info_text" href="?board=2.0"><span class="subject">Off topic</span></a></div>
        "#;
        let doc = Document::parse(html, base_url());

        let links = doc.select(".board a.info_text").unwrap();
        assert_eq!(links.len(), 2);

        let subject = select_first_in(&links[1], ".subject").unwrap().unwrap();
        assert_eq!(text_of(&subject), "Off topic");
        assert_eq!(
            doc.resolve_attr(&links[0], "href"),
            Some("https://forum.example.org/index.php?board=1.0".to_string())
        );
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let doc = Document::parse("<p></p>", base_url());
        let err = doc.select("a[").unwrap_err();
        assert_eq!(err.selector, "a[");
    }

    #[test]
    fn test_resolve_link_filters_schemes() {
        let base = base_url();
        assert_eq!(resolve_link("javascript:void(0)", &base), None);
        assert_eq!(resolve_link("mailto:a@b.c", &base), None);
        assert_eq!(resolve_link("data:image/png;base64,AAAA", &base), None);
        assert_eq!(resolve_link("#top", &base), None);
        assert_eq!(resolve_link("   ", &base), None);
        assert_eq!(resolve_link("ftp://files.example.org/a", &base), None);
        assert_eq!(
            resolve_link("/smileys/smile.gif", &base),
            Some("https://forum.example.org/smileys/smile.gif".to_string())
        );
    }
}
