use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::config::SiteConfig;

/// One item card from a listing page. Lives for a single page visit.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub index: usize,
    /// Site-assigned identifier where the storefront exposes one.
    pub id: Option<String>,
    pub name: String,
    pub thumbnail_url: String,
    pub detail_url: String,
    /// Price shown on the card; some sites only price the listing.
    pub price: Option<String>,
}

/// Enumerate the item cards on a listing page. A card missing a required
/// field is skipped with a warning; it never fails the page.
pub fn enumerate(html: &str, site: &SiteConfig, base_url: &str) -> Vec<CatalogItem> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse(site.listing.card).unwrap();

    let mut items = Vec::new();
    for (index, card) in doc.select(&card_sel).enumerate() {
        match read_card(card, site, base_url, index) {
            Some(item) => items.push(item),
            None => warn!(index, "listing card missing required fields, skipped"),
        }
    }
    items
}

fn read_card(
    card: ElementRef<'_>,
    site: &SiteConfig,
    base_url: &str,
    index: usize,
) -> Option<CatalogItem> {
    let thumb_sel = Selector::parse(site.listing.thumbnail).unwrap();
    let name_sel = Selector::parse(site.listing.name).unwrap();
    let link_sel = Selector::parse(site.listing.link).unwrap();

    let thumbnail_url = card
        .select(&thumb_sel)
        .next()?
        .value()
        .attr("src")
        .map(|s| absolutize(s, base_url))?;
    let name = card
        .select(&name_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())?;
    let detail_url = card
        .select(&link_sel)
        .next()?
        .value()
        .attr("href")
        .map(|s| absolutize(s, base_url))?;

    let id = site
        .listing
        .id_attr
        .and_then(|attr| card.value().attr(attr))
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let price = site.listing.price.and_then(|sel| {
        let sel = Selector::parse(sel).unwrap();
        card.select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    });

    Some(CatalogItem {
        index,
        id,
        name,
        thumbnail_url,
        detail_url,
        price,
    })
}

/// Cross-page dedup: keep only items whose identifier has not been seen,
/// recording new identifiers in `seen`. Items without ids are always new.
pub fn filter_new(items: Vec<CatalogItem>, seen: &mut HashSet<String>) -> Vec<CatalogItem> {
    items
        .into_iter()
        .filter(|item| match &item.id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect()
}

fn absolutize(raw: &str, base_url: &str) -> String {
    if raw.starts_with("//") {
        return format!("https:{raw}");
    }
    if raw.starts_with("http") {
        return raw.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(raw)) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

// ── Tests ──
