use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use url::Url;

use crate::config::{DescriptionRule, SiteConfig};
use crate::images;

/// Number of detail-image downloads in flight for one product.
const DOWNLOAD_WORKERS: usize = 5;

/// Field subset pulled off one detail page. Every field is independently
/// fault-tolerant: a missing element means an absent value, not an error.
#[derive(Debug, Default)]
pub struct DetailData {
    /// Fuller product name from the detail page, where configured.
    pub name: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    /// Deduplicated, filtered image URLs in first-seen order.
    pub image_urls: Vec<String>,
}

pub fn extract_detail(html: &str, site: &SiteConfig, base_url: &str) -> DetailData {
    let doc = Html::parse_document(html);

    let name = site.detail.name.and_then(|sel| select_text(&doc, sel));

    let price = site
        .detail
        .price
        .and_then(|sel| select_text(&doc, sel))
        .or_else(|| site.detail.missing_price.map(str::to_string));

    let description = extract_description(&doc, &site.detail.description);
    let image_urls = collect_image_urls(&doc, site, base_url);

    DetailData {
        name,
        price,
        description,
        image_urls,
    }
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_description(doc: &Html, rule: &DescriptionRule) -> Option<String> {
    let text = match rule {
        DescriptionRule::Paragraphs {
            container,
            paragraph,
        } => {
            let container_sel = Selector::parse(container).unwrap();
            let para_sel = Selector::parse(paragraph).unwrap();
            let container = doc.select(&container_sel).next()?;
            container
                .select(&para_sel)
                .map(|p| p.text().map(str::trim).collect::<String>())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
        DescriptionRule::ContainerText { container } => {
            let container_sel = Selector::parse(container).unwrap();
            let container = doc.select(&container_sel).next()?;
            container
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    Some(text).filter(|t| !t.is_empty())
}

/// Scan image elements, preferring the lazy-load attribute over `src`, skip
/// inline data images, normalize to absolute URLs, apply the site's filter
/// and dedup preserving first-seen order.
fn collect_image_urls(doc: &Html, site: &SiteConfig, base_url: &str) -> Vec<String> {
    let img_sel = Selector::parse(site.images.selector).unwrap();

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for img in doc.select(&img_sel) {
        let raw = img
            .value()
            .attr(site.images.lazy_attr)
            .or_else(|| img.value().attr("src"));
        let Some(raw) = raw else { continue };
        if raw.starts_with("data:image") {
            continue;
        }
        let Some(url) = normalize_image_url(raw, base_url) else {
            continue;
        };
        if !site.images.accepts(&url) {
            continue;
        }
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}

/// Absolute https URL for an image reference: protocol-relative URLs get an
/// https prefix, plain http is upgraded, site-relative paths are joined onto
/// the listing origin.
pub fn normalize_image_url(raw: &str, base_url: &str) -> Option<String> {
    if raw.starts_with("//") {
        return Some(format!("https:{raw}"));
    }
    if let Some(rest) = raw.strip_prefix("http://") {
        return Some(format!("https://{rest}"));
    }
    if raw.starts_with("http") {
        return Some(raw.to_string());
    }
    Url::parse(base_url)
        .and_then(|base| base.join(raw))
        .map(|u| u.to_string())
        .ok()
}

/// Fan the deduplicated URL list out to the image persister with a bounded
/// worker pool. Filenames are positional (`{rank}_{n}.jpg`), never assigned
/// by completion order, and one failed download never aborts the rest. Waits
/// for every dispatched download before returning.
pub async fn download_detail_images(
    client: &reqwest::Client,
    urls: &[String],
    rank: u32,
    folder: &Path,
) -> Vec<String> {
    let filenames: Vec<String> = (1..=urls.len())
        .map(|n| format!("{rank}_{n}.jpg"))
        .collect();
    if urls.is_empty() {
        return filenames;
    }

    let semaphore = Arc::new(Semaphore::new(DOWNLOAD_WORKERS));
    let mut tasks = Vec::with_capacity(urls.len());
    for (url, filename) in urls.iter().zip(&filenames) {
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        let url = url.clone();
        let filename = filename.clone();
        let folder = folder.to_path_buf();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            images::save_image(&client, &url, &filename, &folder).await
        }));
    }

    let mut saved = 0usize;
    for task in tasks {
        match task.await {
            Ok(true) => saved += 1,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "image download task panicked"),
        }
    }
    info!(rank, total = urls.len(), saved, "detail images downloaded");

    filenames
}

// ── Tests ──
