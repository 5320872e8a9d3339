use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use hanoi_listings::browser::WebDriverFactory;
use hanoi_listings::cleaning;
use hanoi_listings::config::ScraperConfig;
use hanoi_listings::models::Partition;
use hanoi_listings::runner;
use hanoi_listings::store::RecordStore;

fn prompt_yes_no(prompt: &str) -> Result<bool> {
    loop {
        print!("{}", prompt);
        io::stdout()
            .flush()
            .context("Failed to flush stdout while prompting for input")?;

        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .context("Failed to read prompt input")?;

        match input.trim().to_lowercase().as_str() {
            "yes" | "y" => return Ok(true),
            "no" | "n" => return Ok(false),
            _ => println!("Please answer yes or no.\n"),
        }
    }
}

fn resolve_partitions(districts: &[String]) -> Result<Vec<Partition>> {
    if districts.is_empty() {
        return Ok(Partition::defaults());
    }

    let mut partitions = Vec::new();
    for district in districts {
        let partition: Partition = district
            .parse()
            .with_context(|| format!("Invalid district {:?}", district))?;
        if !partitions.contains(&partition) {
            partitions.push(partition);
        }
    }
    Ok(partitions)
}

#[derive(Parser)]
#[command(name = "hanoi-listings")]
#[command(about = "Scrape Hanoi apartment listings into per-district CSV files", long_about = None)]
struct Cli {
    /// Directory holding district files, debug dumps and the merged output
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ScrapeArgs {
    /// District slug, repeatable. Defaults to every Hanoi district.
    #[arg(short, long = "district")]
    districts: Vec<String>,

    #[arg(long, default_value_t = 1)]
    start_page: u32,

    #[arg(long, default_value_t = 100)]
    end_page: u32,

    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    headless: bool,

    #[arg(long)]
    webdriver_url: Option<String>,

    /// Seconds to wait for a page's listings or map to appear
    #[arg(long)]
    timeout: Option<u64>,

    /// Overwrite existing district files instead of appending
    #[arg(long, default_value_t = false)]
    fresh: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape districts page by page into their CSV files
    Scrape(ScrapeArgs),

    /// Merge and clean the district files into one dataset
    Merge {
        #[arg(short, long = "district")]
        districts: Vec<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

async fn run_scrape(config: ScraperConfig, partitions: Vec<Partition>) -> Result<()> {
    let factory = WebDriverFactory {
        webdriver_url: config.webdriver_url.clone(),
        headless: config.headless,
        poll_interval: config.poll_interval,
    };

    let summary = runner::scrape_partitions(&factory, &config, partitions).await?;
    summary.display();

    let anomalies = summary.anomalies();
    if !anomalies.is_empty() {
        warn!(
            "Districts stopped on unexpected timeouts (see {}): {:?}",
            config.data_dir.join("debug").display(),
            anomalies.iter().map(|p| p.as_str()).collect::<Vec<_>>()
        );
    }
    if let Some(e) = summary.first_error() {
        warn!("{} districts failed; first error: {}", summary.failed(), e);
    }

    info!("Scraping completed for all districts.");
    Ok(())
}

fn run_merge(config: &ScraperConfig, partitions: &[Partition], output: PathBuf) -> Result<()> {
    let store = RecordStore::new(&config.data_dir);
    let report = cleaning::merge_partitions(&store, partitions, &output)
        .with_context(|| format!("Failed to write merged dataset to {}", output.display()))?;

    if report.output.is_none() {
        info!("No valid data to process.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = ScraperConfig::from_env().context("Failed to read configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Some(Commands::Scrape(args)) => {
            config.start_page = args.start_page;
            config.end_page = args.end_page;
            config.headless = args.headless;
            config.fresh = args.fresh;
            if let Some(workers) = args.workers {
                config.workers = workers;
            }
            if let Some(url) = args.webdriver_url {
                config.webdriver_url = url;
            }
            if let Some(secs) = args.timeout {
                config.page_timeout = Duration::from_secs(secs);
                config.detail_timeout = Duration::from_secs(secs);
            }
            config.validate()?;

            let partitions = resolve_partitions(&args.districts)?;
            run_scrape(config, partitions).await?;
        }

        Some(Commands::Merge { districts, output }) => {
            let partitions = resolve_partitions(&districts)?;
            let output = output.unwrap_or_else(|| config.merged_output_path());
            run_merge(&config, &partitions, output)?;
        }

        None => {
            let partitions = Partition::defaults();

            if prompt_yes_no("Do you want to start scraping? (yes/no): ")? {
                config.validate()?;
                run_scrape(config.clone(), partitions.clone()).await?;
            } else {
                println!("Scraping skipped.");
            }

            if prompt_yes_no("Do you want to start parsing? (yes/no): ")? {
                info!("Starting parsing...");
                run_merge(&config, &partitions, config.merged_output_path())?;
                info!("Parsing completed for all districts.");
            } else {
                println!("Parsing skipped.");
            }
        }
    }

    Ok(())
}
