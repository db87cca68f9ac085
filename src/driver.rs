use std::time::Duration;

use anyhow::{Context, Result};
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use tracing::info;

use crate::error::CrawlError;
use crate::images::USER_AGENT;

/// The navigation/interaction capability the orchestrator needs from a
/// browser session. Kept narrow so the crawl state machine can be exercised
/// against a scripted fake; extraction itself is pure over `page_source`.
pub trait Browser {
    async fn goto(&mut self, url: &str) -> Result<(), CrawlError>;
    async fn back(&mut self) -> Result<(), CrawlError>;
    async fn current_url(&mut self) -> Result<String, CrawlError>;
    /// Wait until an element matching `css` is present; a timeout is a
    /// `NavigationTimeout`.
    async fn wait_for(&mut self, css: &str, timeout: Duration) -> Result<(), CrawlError>;
    /// Wait for an element and click it; absence within the timeout is an
    /// `ElementNotFound`.
    async fn click(&mut self, css: &str, timeout: Duration) -> Result<(), CrawlError>;
    async fn scroll_to_middle(&mut self) -> Result<(), CrawlError>;
    async fn page_source(&mut self) -> Result<String, CrawlError>;
}

/// Live WebDriver session. One per crawl; navigation state is shared, so all
/// page visits are strictly sequential.
pub struct WebSession {
    client: Option<Client>,
}

impl WebSession {
    /// Connect to a WebDriver endpoint (chromedriver/geckodriver) with the
    /// same browser profile the storefronts expect: realistic user agent,
    /// incognito, fixed window size.
    pub async fn connect(webdriver_url: &str) -> Result<Self> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({
                "args": [
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                    "--incognito",
                    format!("user-agent={USER_AGENT}"),
                ]
            }),
        );

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(webdriver_url)
            .await
            .with_context(|| format!("connect to webdriver at {webdriver_url}"))?;
        client.set_window_size(1200, 800).await?;
        info!(webdriver_url, "webdriver session established");
        Ok(Self {
            client: Some(client),
        })
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            info!("webdriver session closed");
        }
        Ok(())
    }

    fn client(&mut self) -> Result<&mut Client, CrawlError> {
        self.client
            .as_mut()
            .ok_or_else(|| CrawlError::Driver("session already closed".to_string()))
    }
}

impl Browser for WebSession {
    async fn goto(&mut self, url: &str) -> Result<(), CrawlError> {
        self.client()?.goto(url).await.map_err(driver_err)
    }

    async fn back(&mut self) -> Result<(), CrawlError> {
        self.client()?.back().await.map_err(driver_err)
    }

    async fn current_url(&mut self) -> Result<String, CrawlError> {
        let url = self.client()?.current_url().await.map_err(driver_err)?;
        Ok(url.to_string())
    }

    async fn wait_for(&mut self, css: &str, timeout: Duration) -> Result<(), CrawlError> {
        self.client()?
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(css))
            .await
            .map(|_| ())
            .map_err(|e| match e {
                CmdError::WaitTimeout => CrawlError::NavigationTimeout {
                    selector: css.to_string(),
                },
                other => driver_err(other),
            })
    }

    async fn click(&mut self, css: &str, timeout: Duration) -> Result<(), CrawlError> {
        let element = self
            .client()?
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(css))
            .await
            .map_err(|e| match e {
                CmdError::WaitTimeout => CrawlError::ElementNotFound {
                    selector: css.to_string(),
                },
                other => driver_err(other),
            })?;
        element.click().await.map_err(driver_err)
    }

    async fn scroll_to_middle(&mut self) -> Result<(), CrawlError> {
        self.client()?
            .execute("window.scrollTo(0, document.body.scrollHeight / 2);", vec![])
            .await
            .map(|_| ())
            .map_err(driver_err)
    }

    async fn page_source(&mut self) -> Result<String, CrawlError> {
        self.client()?.source().await.map_err(driver_err)
    }
}

fn driver_err(e: CmdError) -> CrawlError {
    if e.is_no_such_element() {
        CrawlError::ElementNotFound {
            selector: e.to_string(),
        }
    } else {
        CrawlError::Driver(e.to_string())
    }
}
