use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{Pagination, SiteConfig};
use crate::detail::{self, DetailData};
use crate::driver::Browser;
use crate::error::CrawlError;
use crate::images;
use crate::listing;
use crate::store::{Checkpointer, ProductRecord};

const LISTING_TIMEOUT: Duration = Duration::from_secs(30);
const PAGINATION_TIMEOUT: Duration = Duration::from_secs(10);
const EXPAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Short pause after navigating to a detail page.
const NAV_SETTLE: Duration = Duration::from_millis(100);
/// Pause after a "load more" click while the list grows.
const LOAD_MORE_SETTLE: Duration = Duration::from_secs(2);
const PAGE_SETTLE: Duration = Duration::from_secs(1);

pub struct CrawlOptions {
    pub thumb_dir: PathBuf,
    pub detail_dir: PathBuf,
    pub start_page: u32,
    pub max_pages: Option<u32>,
}

/// Process-local crawl state. Durability is delegated entirely to the
/// checkpointer; this value is discarded at crawl end.
pub struct CrawlState {
    pub seen: HashSet<String>,
    pub page: u32,
    rank: u32,
    pub records: Vec<ProductRecord>,
    pub flushed: usize,
}

impl CrawlState {
    /// Resuming from a later page seeds the rank counter so filenames stay
    /// aligned with catalog position. Pages are 1-based; 0 is treated as 1.
    pub fn new(start_page: u32, per_page: u32) -> Self {
        let start_page = start_page.max(1);
        Self {
            seen: HashSet::new(),
            page: start_page,
            rank: (start_page - 1) * per_page + 1,
            records: Vec::new(),
            flushed: 0,
        }
    }

    /// Consume the next rank. Ranks advance for every attempted item, failed
    /// ones included, keeping rank-derived filenames globally unique.
    pub fn take_rank(&mut self) -> u32 {
        let rank = self.rank;
        self.rank += 1;
        rank
    }

    pub fn unflushed(&self) -> usize {
        self.records.len() - self.flushed
    }
}

#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages: u32,
    pub attempted: usize,
    pub recorded: usize,
    pub detail_failures: usize,
}

/// Drive the whole crawl. Whatever happens inside the loop, any buffered
/// records beyond the last flush are written out before returning — data
/// collected before a failure is never silently lost.
pub async fn run_crawl<B: Browser>(
    browser: &mut B,
    http: &reqwest::Client,
    site: &SiteConfig,
    checkpointer: &dyn Checkpointer,
    opts: &CrawlOptions,
) -> Result<CrawlStats> {
    let mut state = CrawlState::new(opts.start_page, site.per_page);
    let mut stats = CrawlStats::default();

    let result = crawl_loop(browser, http, site, checkpointer, opts, &mut state, &mut stats).await;

    if state.unflushed() > 0 {
        info!(records = state.records.len(), "final checkpoint flush");
        if let Err(e) = checkpointer.flush(&state.records) {
            warn!(error = %e, "final flush failed");
        }
    }

    result?;
    stats.recorded = state.records.len();
    Ok(stats)
}

async fn crawl_loop<B: Browser>(
    browser: &mut B,
    http: &reqwest::Client,
    site: &SiteConfig,
    checkpointer: &dyn Checkpointer,
    opts: &CrawlOptions,
    state: &mut CrawlState,
    stats: &mut CrawlStats,
) -> Result<()> {
    let start_url = site.listing_url(opts.start_page);
    info!(site = site.name, url = %start_url, "starting crawl");
    browser.goto(&start_url).await?;

    loop {
        // LoadingListing
        let page_start = Instant::now();
        match browser.wait_for(site.listing.wait, LISTING_TIMEOUT).await {
            Ok(()) => {}
            Err(CrawlError::NavigationTimeout { .. }) => {
                info!(page = state.page, "listing never appeared, no more data");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        if let Ok(url) = browser.current_url().await {
            info!(page = state.page, url = %url, "listing loaded");
        }

        // WalkingListing
        let source = browser.page_source().await?;
        let items = listing::enumerate(&source, site, &site.listing_url(state.page));
        let new_items = listing::filter_new(items, &mut state.seen);
        if new_items.is_empty() {
            info!(page = state.page, "no new items, crawl exhausted");
            break;
        }
        println!(
            ">>> page {}: {} new item(s)",
            state.page,
            new_items.len()
        );

        // Per item: VisitingDetail → Recording, strictly sequential; the
        // single browser session navigates away and back for each item.
        let total = new_items.len();
        for (position, item) in new_items.into_iter().enumerate() {
            let rank = state.take_rank();
            stats.attempted += 1;

            let mut record = ProductRecord::new(rank, state.page, item.name.clone());
            record.price = item.price.clone();
            images::save_image(http, &item.thumbnail_url, &record.thumbnail_file, &opts.thumb_dir)
                .await;

            match visit_detail(browser, http, site, &item.detail_url, rank, opts).await {
                Ok((data, files)) => {
                    apply_detail(&mut record, data, files);
                    if let Err(e) = browser.back().await {
                        warn!(rank, error = %e, "return to listing failed");
                    }
                }
                Err(e) => {
                    // Item-level containment: record what we have, keep the
                    // rank, move on.
                    stats.detail_failures += 1;
                    warn!(rank, url = %item.detail_url, error = %e, "detail visit failed");
                    if let Err(e) = browser.back().await {
                        warn!(rank, error = %e, "return to listing failed");
                    }
                }
            }

            info!(rank, name = %record.name, "recorded");
            state.records.push(record);

            let is_last = position + 1 == total;
            if state.unflushed() >= site.flush_every || is_last {
                checkpointer.flush(&state.records)?;
                state.flushed = state.records.len();
                info!(records = state.flushed, "checkpoint written");
            }
        }

        stats.pages += 1;
        println!(
            "<<< page {} done in {:.1}s",
            state.page,
            page_start.elapsed().as_secs_f64()
        );

        if let Some(max) = opts.max_pages {
            if stats.pages >= max {
                info!(pages = stats.pages, "page limit reached");
                break;
            }
        }

        // AdvancingPage
        if !advance_page(browser, site, state.page).await {
            break;
        }
        state.page += 1;
    }

    Ok(())
}

async fn visit_detail<B: Browser>(
    browser: &mut B,
    http: &reqwest::Client,
    site: &SiteConfig,
    url: &str,
    rank: u32,
    opts: &CrawlOptions,
) -> Result<(DetailData, Vec<String>), CrawlError> {
    browser.goto(url).await?;
    tokio::time::sleep(NAV_SETTLE).await;

    if let Some(button) = site.detail.expand {
        expand_description(browser, button).await;
    }

    let source = browser.page_source().await?;
    let data = detail::extract_detail(&source, site, url);
    let files =
        detail::download_detail_images(http, &data.image_urls, rank, &opts.detail_dir).await;
    Ok((data, files))
}

/// Click the "show more" control; if it is not interactable, scroll halfway
/// down and retry once. Still unavailable → proceed with partial content.
async fn expand_description<B: Browser>(browser: &mut B, button: &str) {
    if browser.click(button, EXPAND_TIMEOUT).await.is_ok() {
        return;
    }
    info!("expand control not clickable, scrolling to mid-page");
    if browser.scroll_to_middle().await.is_err() {
        return;
    }
    tokio::time::sleep(PAGE_SETTLE).await;
    if browser.click(button, EXPAND_TIMEOUT).await.is_err() {
        info!("expand control still unavailable, continuing unexpanded");
    }
}

fn apply_detail(record: &mut ProductRecord, data: DetailData, files: Vec<String>) {
    if let Some(name) = data.name {
        record.name = name;
    }
    if data.price.is_some() {
        record.price = data.price;
    }
    record.description = data.description;
    record.detail_files = files;
}

/// Activate the next-page affordance. `false` means pagination is exhausted
/// (or the control is gone, which is observationally identical).
async fn advance_page<B: Browser>(browser: &mut B, site: &SiteConfig, current_page: u32) -> bool {
    match &site.pagination {
        Pagination::None => false,
        Pagination::LoadMore { button } => {
            match browser.click(button, PAGINATION_TIMEOUT).await {
                Ok(()) => {
                    tokio::time::sleep(LOAD_MORE_SETTLE).await;
                    true
                }
                Err(e) => {
                    info!(error = %e, "load-more control not found, stopping");
                    false
                }
            }
        }
        Pagination::Numbered {
            page_link,
            next_block,
            block_size,
        } => {
            let next = current_page + 1;
            let result = if next % block_size == 1 {
                browser.click(next_block, PAGINATION_TIMEOUT).await
            } else {
                let slot = match next % block_size {
                    0 => *block_size,
                    n => n,
                };
                let selector = page_link.replace("{n}", &slot.to_string());
                browser.click(&selector, PAGINATION_TIMEOUT).await
            };
            match result {
                Ok(()) => {
                    tokio::time::sleep(PAGE_SETTLE).await;
                    true
                }
                Err(e) => {
                    info!(error = %e, "next page link not found, stopping");
                    false
                }
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_raw, CsvCheckpointer, RAW_FILE};
    use std::collections::HashMap;

    /// Scripted browser: a sequence of listing sources (one per load-more
    /// state) plus canned detail pages. `Err` entries simulate a detail
    /// visit blowing up mid-extraction.
    struct FakeBrowser {
        listings: Vec<String>,
        details: HashMap<String, Result<String, ()>>,
        page: usize,
        on_detail: Option<String>,
    }

    impl FakeBrowser {
        fn new(listings: Vec<String>, details: HashMap<String, Result<String, ()>>) -> Self {
            Self {
                listings,
                details,
                page: 0,
                on_detail: None,
            }
        }
    }

    impl Browser for FakeBrowser {
        async fn goto(&mut self, url: &str) -> Result<(), CrawlError> {
            if let Some(entry) = self.details.get(url) {
                match entry {
                    Ok(_) => {
                        self.on_detail = Some(url.to_string());
                        Ok(())
                    }
                    Err(()) => Err(CrawlError::Driver("detail page exploded".into())),
                }
            } else {
                self.on_detail = None;
                Ok(())
            }
        }

        async fn back(&mut self) -> Result<(), CrawlError> {
            self.on_detail = None;
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String, CrawlError> {
            Ok("fake://".into())
        }

        async fn wait_for(&mut self, css: &str, _: Duration) -> Result<(), CrawlError> {
            if self.page < self.listings.len() {
                Ok(())
            } else {
                Err(CrawlError::NavigationTimeout {
                    selector: css.into(),
                })
            }
        }

        async fn click(&mut self, css: &str, _: Duration) -> Result<(), CrawlError> {
            // Only the load-more control exists in the fake.
            if self.page + 1 < self.listings.len() {
                self.page += 1;
                Ok(())
            } else {
                Err(CrawlError::ElementNotFound {
                    selector: css.into(),
                })
            }
        }

        async fn scroll_to_middle(&mut self) -> Result<(), CrawlError> {
            Ok(())
        }

        async fn page_source(&mut self) -> Result<String, CrawlError> {
            match &self.on_detail {
                Some(url) => Ok(self.details[url].clone().unwrap()),
                None => Ok(self.listings[self.page].clone()),
            }
        }
    }

    const THUMB: &str = "data:image/png;base64,aGk=";

    fn listing_html(ids: &[&str]) -> String {
        let cards: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<li id="{id}">
                         <div class="thumbnail"><a href="fake://detail/{id}">
                           <img src="{THUMB}"></a></div>
                         <strong class="name">Item {id}</strong>
                       </li>"#
                )
            })
            .collect();
        format!(r#"<ul class="prdList grid4">{cards}</ul>"#)
    }

    fn detail_html(id: &str) -> String {
        format!(
            r#"<strong id="span_product_price_text">{id},000원</strong>
               <div id="prdDetail">상태 / 양호</div>"#
        )
    }

    fn fake_site(
        listings: Vec<Vec<&str>>,
        failing: &[&str],
    ) -> (FakeBrowser, HashMap<String, Result<String, ()>>) {
        let mut details = HashMap::new();
        for ids in &listings {
            for id in ids {
                let entry = if failing.contains(id) {
                    Err(())
                } else {
                    Ok(detail_html(id))
                };
                details.insert(format!("fake://detail/{id}"), entry);
            }
        }
        let sources = listings.iter().map(|ids| listing_html(ids)).collect();
        (FakeBrowser::new(sources, details.clone()), details)
    }

    fn options(dir: &std::path::Path) -> CrawlOptions {
        CrawlOptions {
            thumb_dir: dir.join("thumbnails"),
            detail_dir: dir.join("detail_images"),
            start_page: 1,
            max_pages: None,
        }
    }

    #[tokio::test]
    async fn checkpoint_complete_ranks_gapless() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();
        std::fs::create_dir_all(dir.path().join("detail_images")).unwrap();

        let site = SiteConfig::by_name("daall").unwrap(); // flush_every = 5
        // Page 2 repeats page 1's items plus four appended ones: 7 attempts
        // total, not a multiple of the flush threshold.
        let (mut browser, _) = fake_site(
            vec![
                vec!["a1", "a2", "a3"],
                vec!["a1", "a2", "a3", "b1", "b2", "b3", "b4"],
            ],
            &[],
        );

        let ckpt = CsvCheckpointer::new(dir.path().join(RAW_FILE));
        let http = images::http_client().unwrap();
        let stats = run_crawl(&mut browser, &http, site, &ckpt, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats.attempted, 7);
        assert_eq!(stats.recorded, 7);
        assert_eq!(stats.pages, 2);

        let rows = read_raw(ckpt.path()).unwrap();
        assert_eq!(rows.len(), 7);
        let ranks: Vec<u32> = rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5, 6, 7]);
        // Dedup kept the repeated cards off page 2.
        assert_eq!(rows[3].name, "Item b1");
        assert_eq!(rows[3].page, 2);
        assert_eq!(rows[0].price.as_deref(), Some("a1,000원"));
        assert_eq!(rows[0].thumbnail_file, "1.jpg");
        // Thumbnails were materialized from the inline payloads.
        assert!(dir.path().join("thumbnails/1.jpg").exists());
        assert!(dir.path().join("thumbnails/7.jpg").exists());
    }

    #[tokio::test]
    async fn detail_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();
        std::fs::create_dir_all(dir.path().join("detail_images")).unwrap();

        let site = SiteConfig::by_name("daall").unwrap();
        let (mut browser, _) = fake_site(vec![vec!["a1", "a2", "a3"]], &["a2"]);

        let ckpt = CsvCheckpointer::new(dir.path().join(RAW_FILE));
        let http = images::http_client().unwrap();
        let stats = run_crawl(&mut browser, &http, site, &ckpt, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.detail_failures, 1);

        let rows = read_raw(ckpt.path()).unwrap();
        assert_eq!(rows.len(), 3);
        // Failed item keeps its rank and its listing-card fields; the
        // unextracted fields stay empty.
        assert_eq!(rows[1].rank, 2);
        assert_eq!(rows[1].name, "Item a2");
        assert_eq!(rows[1].description, None);
        assert_eq!(rows[1].price, None);
        // The crawl carried on past the failure.
        assert_eq!(rows[2].description.as_deref(), Some("상태 / 양호"));
    }

    #[tokio::test]
    async fn rank_seeded_from_start_page() {
        let state = CrawlState::new(3, 20);
        assert_eq!(state.page, 3);
        let mut state = state;
        assert_eq!(state.take_rank(), 41);
        assert_eq!(state.take_rank(), 42);
    }

    #[tokio::test]
    async fn start_page_zero_treated_as_first() {
        let mut state = CrawlState::new(0, 20);
        assert_eq!(state.page, 1);
        assert_eq!(state.take_rank(), 1);
    }

    /// Records every click and scroll; the first `fail_clicks` clicks report
    /// the element as missing.
    struct ClickRecorder {
        clicks: Vec<String>,
        scrolls: usize,
        fail_clicks: usize,
    }

    impl ClickRecorder {
        fn new(fail_clicks: usize) -> Self {
            Self {
                clicks: Vec::new(),
                scrolls: 0,
                fail_clicks,
            }
        }
    }

    impl Browser for ClickRecorder {
        async fn goto(&mut self, _: &str) -> Result<(), CrawlError> {
            Ok(())
        }

        async fn back(&mut self) -> Result<(), CrawlError> {
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String, CrawlError> {
            Ok("fake://".into())
        }

        async fn wait_for(&mut self, _: &str, _: Duration) -> Result<(), CrawlError> {
            Ok(())
        }

        async fn click(&mut self, css: &str, _: Duration) -> Result<(), CrawlError> {
            self.clicks.push(css.to_string());
            if self.clicks.len() <= self.fail_clicks {
                Err(CrawlError::ElementNotFound {
                    selector: css.into(),
                })
            } else {
                Ok(())
            }
        }

        async fn scroll_to_middle(&mut self) -> Result<(), CrawlError> {
            self.scrolls += 1;
            Ok(())
        }

        async fn page_source(&mut self) -> Result<String, CrawlError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn numbered_pagination_walks_blocks() {
        let site = SiteConfig::by_name("wiselux").unwrap(); // blocks of 10

        // Inside a block the in-block slot is clicked, 1-based.
        let mut rec = ClickRecorder::new(0);
        assert!(advance_page(&mut rec, site, 1).await);
        assert_eq!(
            rec.clicks.last().unwrap(),
            "div.xans-product-normalpaging ol li:nth-child(2) a"
        );

        // The last page of a block maps to slot `block_size`, not 0.
        let mut rec = ClickRecorder::new(0);
        assert!(advance_page(&mut rec, site, 9).await);
        assert_eq!(
            rec.clicks.last().unwrap(),
            "div.xans-product-normalpaging ol li:nth-child(10) a"
        );

        // Crossing a block boundary clicks the next-block arrow instead.
        let mut rec = ClickRecorder::new(0);
        assert!(advance_page(&mut rec, site, 10).await);
        assert_eq!(
            rec.clicks.last().unwrap(),
            r#"div.xans-product-normalpaging a img[alt="다음 페이지"]"#
        );

        // A missing control ends pagination.
        let mut rec = ClickRecorder::new(usize::MAX);
        assert!(!advance_page(&mut rec, site, 1).await);
    }

    #[tokio::test]
    async fn expand_retries_once_after_scroll() {
        // Clickable right away: no scrolling.
        let mut rec = ClickRecorder::new(0);
        expand_description(&mut rec, "button.more").await;
        assert_eq!(rec.clicks.len(), 1);
        assert_eq!(rec.scrolls, 0);

        // First click misses: scroll to mid-page and retry once.
        let mut rec = ClickRecorder::new(1);
        expand_description(&mut rec, "button.more").await;
        assert_eq!(rec.clicks.len(), 2);
        assert_eq!(rec.scrolls, 1);

        // Retry also misses: give up, exactly one scroll and two clicks.
        let mut rec = ClickRecorder::new(2);
        expand_description(&mut rec, "button.more").await;
        assert_eq!(rec.clicks.len(), 2);
        assert_eq!(rec.scrolls, 1);
    }

    #[tokio::test]
    async fn page_limit_stops_crawl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();
        std::fs::create_dir_all(dir.path().join("detail_images")).unwrap();

        let site = SiteConfig::by_name("daall").unwrap();
        let (mut browser, _) = fake_site(
            vec![vec!["a1"], vec!["a1", "b1"], vec!["a1", "b1", "c1"]],
            &[],
        );

        let mut opts = options(dir.path());
        opts.max_pages = Some(2);

        let ckpt = CsvCheckpointer::new(dir.path().join(RAW_FILE));
        let http = images::http_client().unwrap();
        let stats = run_crawl(&mut browser, &http, site, &ckpt, &opts)
            .await
            .unwrap();

        assert_eq!(stats.pages, 2);
        assert_eq!(stats.recorded, 2);
    }
}
