use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

const MAX_LINKS_PER_PAGE: usize = 5_000;

/// Collects followable links from `<a href>` and `<area href>` elements,
/// resolved against the page's live URL. Fragment-only, `javascript:`
/// and `mailto:` references are skipped; fragments are stripped.
pub fn extract_links(html: &str, page_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href], area[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let base = base_href(&document, page_url);

    let mut seen = HashSet::new();
    let mut links: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        if links.len() >= MAX_LINKS_PER_PAGE {
            break;
        }
        let Some(mut url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve(href, &base))
        else {
            continue;
        };
        url.set_fragment(None);
        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }
    links
}

/// Honours `<base href>` when present.
fn base_href(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

fn resolve(reference: &str, base: &Url) -> Option<Url> {
    let trimmed = reference.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
    {
        return None;
    }
    let url = base.join(trimmed).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
