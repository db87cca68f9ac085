mod config;
mod crawl;
mod detail;
mod driver;
mod error;
mod extract;
mod images;
mod listing;
mod process;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use config::SiteConfig;
use store::CsvCheckpointer;

const DEFAULT_WEBDRIVER: &str = "http://localhost:9515";

#[derive(Parser)]
#[command(
    name = "luxe_scraper",
    about = "Product catalog scraper for secondhand luxury storefronts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CrawlArgs {
    /// Site adapter to crawl (see `sites`)
    #[arg(short, long)]
    site: String,
    /// Output directory for tables and images
    #[arg(short, long, default_value = "data")]
    out: PathBuf,
    /// WebDriver endpoint
    #[arg(long, default_value = DEFAULT_WEBDRIVER)]
    webdriver: String,
    /// Listing page to start from (rank counter is seeded accordingly)
    #[arg(long, default_value = "1")]
    start_page: u32,
    /// Stop after this many listing pages
    #[arg(short = 'n', long)]
    max_pages: Option<u32>,
    /// Delete a stale raw table before crawling
    #[arg(long)]
    fresh: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a storefront's catalog into the raw table
    Crawl(CrawlArgs),
    /// Derive structured columns from a crawled raw table
    Process {
        /// Directory holding the raw table
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
    /// Crawl + process in one pipeline
    Run(CrawlArgs),
    /// List built-in site adapters
    Sites,
    /// Row and image counts for a crawled raw table
    Stats {
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl_command(&args).await.map(|_| ()),
        Commands::Process { out } => {
            let stats = process::run(&out)?;
            stats.print();
            Ok(())
        }
        Commands::Run(args) => {
            run_crawl_command(&args).await?;
            let stats = process::run(&args.out)?;
            stats.print();
            Ok(())
        }
        Commands::Sites => {
            for site in SiteConfig::all() {
                println!("{:<10} {}", site.name, site.label);
                println!("           {}", site.listing_url);
            }
            Ok(())
        }
        Commands::Stats { out } => print_stats(&out),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_crawl_command(args: &CrawlArgs) -> Result<crawl::CrawlStats> {
    let site = SiteConfig::by_name(&args.site)
        .with_context(|| format!("unknown site '{}' (try `sites`)", args.site))?;

    let thumb_dir = args.out.join("thumbnails");
    let detail_dir = args.out.join("detail_images");
    std::fs::create_dir_all(&thumb_dir)?;
    std::fs::create_dir_all(&detail_dir)?;

    let raw_path = args.out.join(store::RAW_FILE);
    if args.fresh && raw_path.exists() {
        std::fs::remove_file(&raw_path)?;
        println!("Deleted stale table {}", raw_path.display());
    }

    let checkpointer = CsvCheckpointer::new(raw_path);
    let http = images::http_client()?;
    let opts = crawl::CrawlOptions {
        thumb_dir,
        detail_dir,
        start_page: args.start_page.max(1),
        max_pages: args.max_pages,
    };

    let mut session = driver::WebSession::connect(&args.webdriver).await?;
    let result = crawl::run_crawl(&mut session, &http, site, &checkpointer, &opts).await;
    // The session is released whether the crawl succeeded or not.
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "webdriver session close failed");
    }
    let stats = result?;

    println!(
        "Crawled {} page(s): {} item(s) attempted, {} recorded, {} detail failure(s).",
        stats.pages, stats.attempted, stats.recorded, stats.detail_failures
    );
    Ok(stats)
}

fn print_stats(out: &Path) -> Result<()> {
    let rows = store::read_raw(&out.join(store::RAW_FILE))?;
    let with_price = rows.iter().filter(|r| r.price.is_some()).count();
    let with_description = rows.iter().filter(|r| r.description.is_some()).count();
    let detail_images: usize = rows.iter().map(|r| r.detail_files.len()).sum();
    let pages = rows.iter().map(|r| r.page).max().unwrap_or(0);

    println!("Rows:          {}", rows.len());
    println!("Pages:         {}", pages);
    println!("With price:    {}", with_price);
    println!("With details:  {}", with_description);
    println!("Detail images: {}", detail_images);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
