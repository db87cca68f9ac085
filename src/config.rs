//! Per-storefront adapters. Each site is a configuration value consumed by
//! the one crawl loop: selectors, URL template, image filter, pagination
//! strategy and flush threshold. Selectors are fixed per run.

/// How the crawler reaches the next listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// Single listing page; stop after walking it once.
    None,
    /// In-place "load more" button appending items to a persistent list.
    LoadMore { button: &'static str },
    /// Numbered page links grouped in blocks, with a separate control to
    /// advance to the next block. `page_link` contains a `{n}` slot for the
    /// 1-based position of the page inside its block.
    Numbered {
        page_link: &'static str,
        next_block: &'static str,
        block_size: u32,
    },
}

#[derive(Debug, Clone)]
pub struct ListingSelectors {
    /// Waited on before walking; a timeout here means no more data.
    pub wait: &'static str,
    pub card: &'static str,
    pub thumbnail: &'static str,
    pub name: &'static str,
    pub link: &'static str,
    /// Card attribute carrying a stable per-item identifier, where the site
    /// exposes one. Without it, cross-page dedup is not attempted.
    pub id_attr: Option<&'static str>,
    /// Some sites only show the price on the listing card.
    pub price: Option<&'static str>,
}

/// How the description text is assembled from the detail container.
#[derive(Debug, Clone)]
pub enum DescriptionRule {
    /// Join non-empty paragraph texts with newlines.
    Paragraphs {
        container: &'static str,
        paragraph: &'static str,
    },
    /// All text nodes of the container, newline-separated.
    ContainerText { container: &'static str },
}

#[derive(Debug, Clone)]
pub struct DetailSelectors {
    pub price: Option<&'static str>,
    /// Sentinel recorded when the price element is missing, if the site
    /// prefers that over an empty cell.
    pub missing_price: Option<&'static str>,
    /// Detail pages sometimes carry a fuller product name than the card.
    pub name: Option<&'static str>,
    /// "Show more" control that must be clicked before the description
    /// container is populated.
    pub expand: Option<&'static str>,
    pub description: DescriptionRule,
}

/// Detail pages embed plenty of decorative imagery; only URLs passing this
/// filter are downloaded.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    pub selector: &'static str,
    /// Lazy-load attribute preferred over `src`.
    pub lazy_attr: &'static str,
    /// Path segments marking product imagery; empty means no path check.
    pub path_markers: &'static [&'static str],
    pub extensions: &'static [&'static str],
    pub required_host: Option<&'static str>,
}

impl ImageFilter {
    pub fn accepts(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        if !self.extensions.iter().any(|ext| lower.ends_with(ext)) {
            return false;
        }
        if !self.path_markers.is_empty() && !self.path_markers.iter().any(|m| url.contains(m)) {
            return false;
        }
        if let Some(host) = self.required_host {
            if !url.contains(host) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub name: &'static str,
    pub label: &'static str,
    /// Listing URL; `{page}` slot for numbered sites.
    pub listing_url: &'static str,
    /// Items per listing page, used to seed the rank counter when resuming
    /// from a later page.
    pub per_page: u32,
    /// Flush the checkpoint once this many records are buffered unflushed.
    pub flush_every: usize,
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
    pub images: ImageFilter,
    pub pagination: Pagination,
}

impl SiteConfig {
    pub fn all() -> &'static [SiteConfig] {
        SITES
    }

    pub fn by_name(name: &str) -> Option<&'static SiteConfig> {
        SITES.iter().find(|s| s.name == name)
    }

    pub fn listing_url(&self, page: u32) -> String {
        self.listing_url.replace("{page}", &page.to_string())
    }
}

static SITES: &[SiteConfig] = &[
    // Scarf/muffler catalog; classic numbered pagination in blocks of ten.
    SiteConfig {
        name: "wiselux",
        label: "Wiselux scarf & muffler",
        listing_url: "https://wiselux.co.kr/product/list.html?cate_no=209&page={page}",
        per_page: 20,
        flush_every: 1,
        listing: ListingSelectors {
            wait: "ul.prdList.grid4 li",
            card: "ul.prdList.grid4 > li",
            thumbnail: "div.thumbnail img",
            name: "div.description a",
            link: "div.description strong a",
            id_attr: None,
            price: None,
        },
        detail: DetailSelectors {
            price: Some("strong#span_product_price_text"),
            missing_price: None,
            name: Some("div.prd-detail-basic > h3"),
            expand: None,
            description: DescriptionRule::Paragraphs {
                container: "div.cont",
                paragraph: r#"p[class="0"]"#,
            },
        },
        images: ImageFilter {
            selector: "img",
            lazy_attr: "ec-data-src",
            path_markers: &["/detail/"],
            extensions: &[".jpg", ".jpeg", ".png"],
            required_host: Some("wiselux.co.kr"),
        },
        pagination: Pagination::Numbered {
            page_link: "div.xans-product-normalpaging ol li:nth-child({n}) a",
            next_block: r#"div.xans-product-normalpaging a img[alt="다음 페이지"]"#,
            block_size: 10,
        },
    },
    // Watch catalog; "load more" keeps appending to one long list, so cards
    // carry ids and dedup is required.
    SiteConfig {
        name: "daall",
        label: "The Daall watches",
        listing_url: "https://thedaall-dn.com/category/watch/23/",
        per_page: 20,
        flush_every: 5,
        listing: ListingSelectors {
            wait: "ul.prdList li",
            card: "ul.prdList.grid4 li",
            thumbnail: "div.thumbnail a img",
            name: "strong.name",
            link: "div.thumbnail a",
            id_attr: Some("id"),
            price: None,
        },
        detail: DetailSelectors {
            price: Some("strong#span_product_price_text"),
            missing_price: Some("가격 정보 없음"),
            name: None,
            expand: None,
            description: DescriptionRule::ContainerText {
                container: "#prdDetail",
            },
        },
        images: ImageFilter {
            selector: "img",
            lazy_attr: "ec-data-src",
            path_markers: &["/detail/", "/product/"],
            extensions: &[".jpg", ".jpeg", ".png"],
            required_host: None,
        },
        pagination: Pagination::LoadMore {
            button: "div.xans-product-listmore a.btnMore",
        },
    },
    // Silver jewelry smartstore; single listing page, price on the card,
    // description behind a "show more" control.
    SiteConfig {
        name: "dadenda",
        label: "Dadenda silver jewelry",
        listing_url: "https://smartstore.naver.com/dadenda0/category/b2ce3fa6da7a4074b6e3dd2b1f2417ba?cp=1",
        per_page: 20,
        flush_every: 1,
        listing: ListingSelectors {
            wait: "li.Hz4XxKbt9h",
            card: "li.Hz4XxKbt9h",
            thumbnail: "img.eGeLGHztiu",
            name: "strong.xSW7C99vO3",
            link: "div.Da08Est7iL > a",
            id_attr: None,
            price: Some("div.RIs7NC5ZLT"),
        },
        detail: DetailSelectors {
            price: None,
            missing_price: None,
            name: None,
            expand: Some("#INTRODUCE > div > div:nth-child(3) > button"),
            description: DescriptionRule::Paragraphs {
                container: "div.LXGzUhHJC2",
                paragraph: "p",
            },
        },
        images: ImageFilter {
            selector: "img.__cu_imgsize_800_800, img.se-inline-image-resource",
            lazy_attr: "data-src",
            path_markers: &[],
            extensions: &[".jpg", ".jpeg", ".png", ".webp", ".gif"],
            required_host: None,
        },
        pagination: Pagination::None,
    },
];

// ── Tests ──
