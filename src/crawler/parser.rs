//! HTML parser for extracting links
//!
//! This module handles parsing HTML content to extract:
//! - Links to follow (anchors, `<link>` elements, `data-*` URL attributes)
//! - Image candidates from `srcset`, which often point at downloadable files

use crate::url::resolve_link;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

/// Attributes some sites use to carry navigation targets for scripts
const DATA_URL_ATTRIBUTES: &[&str] = &["data-href", "data-url", "data-link"];

/// Extracts absolute links from a fetched page
///
/// Implementations must return canonical (fragment-free) http(s) URLs.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, html: &str, base_url: &Url) -> BTreeSet<Url>;
}

/// Default extractor backed by `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl LinkExtractor for HtmlExtractor {
    fn extract_links(&self, html: &str, base_url: &Url) -> BTreeSet<Url> {
        parse_html(html, base_url)
    }
}

/// Parses HTML content and returns every absolute, canonical link in it
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">`, including those with a `download` attribute
/// - `<link href="...">`
/// - every candidate URL of a `srcset` attribute
/// - `data-href`, `data-url` and `data-link` attributes
///
/// **Exclude:**
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
/// - Anything that is not http(s) after resolution
///
/// Relative links resolve against `<base href>` when the document has one.
///
/// # Example
///
/// ```
/// use siphon::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><body><a href="/page">Link</a><a href="/page#top">Again</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let links = parse_html(html, &base_url);
/// assert_eq!(links.len(), 1);
/// assert!(links.contains(&Url::parse("https://example.com/page").unwrap()));
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> BTreeSet<Url> {
    let document = Html::parse_document(html);
    let base = document_base(&document, base_url);
    extract_links(&document, &base)
}

/// Honors `<base href>` when present
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

fn extract_links(document: &Html, base_url: &Url) -> BTreeSet<Url> {
    let mut links = BTreeSet::new();

    for (selector, attribute) in [("a[href]", "href"), ("link[href]", "href")] {
        if let Ok(selector) = Selector::parse(selector) {
            for element in document.select(&selector) {
                if let Some(url) = element
                    .value()
                    .attr(attribute)
                    .and_then(|href| resolve_link(base_url, href))
                {
                    links.insert(url);
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("[srcset]") {
        for element in document.select(&selector) {
            if let Some(srcset) = element.value().attr("srcset") {
                links.extend(
                    srcset_candidates(srcset).filter_map(|candidate| resolve_link(base_url, candidate)),
                );
            }
        }
    }

    for attribute in DATA_URL_ATTRIBUTES {
        if let Ok(selector) = Selector::parse(&format!("[{}]", attribute)) {
            for element in document.select(&selector) {
                if let Some(url) = element
                    .value()
                    .attr(attribute)
                    .and_then(|href| resolve_link(base_url, href))
                {
                    links.insert(url);
                }
            }
        }
    }

    links
}

/// URLs of a `srcset` value, without their width/density descriptors
fn srcset_candidates(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}
