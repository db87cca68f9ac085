use thiserror::Error;

/// Crawl-level failures. Item-granularity errors are contained at the item
/// boundary by the orchestrator; `NavigationTimeout` on a listing wait is
/// treated as "no more data" rather than a hard error.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("timed out waiting for `{selector}`")]
    NavigationTimeout { selector: String },

    #[error("no element matches `{selector}`")]
    ElementNotFound { selector: String },

    #[error("webdriver command failed: {0}")]
    Driver(String),
}
