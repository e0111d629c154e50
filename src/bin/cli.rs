//! newshound CLI
//!
//! Local entry point for scraping publications and serving the article API.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use newshound::{
    client::SlurpClient,
    error::{AppError, Result},
    models::{Config, DB_ENV_VAR, Filter},
    pipeline,
    services::Scraper,
};

/// newshound - news article scraper and archive
#[derive(Parser, Debug)]
#[command(
    name = "newshound",
    version,
    about = "Discovers, scrapes and serves news articles"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "newshound.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured scrapers
    List,

    /// Run discovery for one scraper and print the article URLs found
    Discover {
        /// Scraper name
        scraper: String,
    },

    /// Scrape publications into the store (all configured ones by default)
    Scrape {
        /// Scraper names
        scrapers: Vec<String>,

        /// Do a single run instead of looping on the run period
        #[arg(long)]
        once: bool,
    },

    /// Scrape a list of article URLs instead of discovering them
    Ingest {
        /// Scraper whose rules and publication apply
        #[arg(short, long)]
        scraper: String,

        /// File with one URL per line
        #[arg(short, long)]
        input: PathBuf,

        /// Rescrape and replace articles already stored
        #[arg(long)]
        update: bool,
    },

    /// Serve the HTTP API
    Serve,

    /// Pull articles from a running server and print them as JSON lines
    Slurp {
        /// Server base URL, including any path prefix
        server: String,

        /// Only these publication codes
        #[arg(long = "pub")]
        pubs: Vec<String>,

        /// Never these publication codes
        #[arg(long = "xpub")]
        xpubs: Vec<String>,

        /// Start after this article id
        #[arg(long)]
        since_id: Option<i64>,

        /// Articles per page (server maximum if unset)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::debug!("Loaded configuration from {}", cli.config.display());

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    match cli.command {
        Command::List => {
            for (name, scraper) in &config.scrapers {
                println!("{}\t{}", name, scraper.discover.url);
            }
        }

        Command::Discover { scraper } => {
            let cancel = pipeline::shutdown_token();
            let urls = pipeline::run_discover(&config, &scraper, &cancel).await?;
            for url in urls {
                println!("{url}");
            }
        }

        Command::Scrape { scrapers, once } => {
            let cancel = pipeline::shutdown_token();
            let store = pipeline::open_store(&config).await?;
            pipeline::run_scrape(&config, store, &scrapers, once, cancel).await?;
        }

        Command::Ingest {
            scraper,
            input,
            update,
        } => {
            let urls = pipeline::read_url_list(&input)?;
            if urls.is_empty() {
                return Err(AppError::validation(format!(
                    "no URLs in {}",
                    input.display()
                )));
            }
            log::info!("Read {} URLs from {}", urls.len(), input.display());

            let cancel = pipeline::shutdown_token();
            let store = pipeline::open_store(&config).await?;
            let stats =
                pipeline::run_ingest(&config, store.as_ref(), &scraper, &urls, update, &cancel)
                    .await?;
            log::info!("Ingest complete: {}", stats);
        }

        Command::Serve => {
            let cancel = pipeline::shutdown_token();
            let store = pipeline::open_store(&config).await?;
            pipeline::run_serve(&config, store, cancel).await?;
        }

        Command::Slurp {
            server,
            pubs,
            xpubs,
            since_id,
            count,
        } => {
            let filter = Filter {
                pub_codes: pubs,
                xpub_codes: xpubs,
                since_id,
                count,
                ..Filter::default()
            };
            let cancel = pipeline::shutdown_token();
            let client = SlurpClient::new(&server)?;
            let stats = client
                .slurp_all(&filter, &cancel, |art| {
                    println!("{}", serde_json::to_string(&art)?);
                    Ok(())
                })
                .await?;
            if !stats.errors.is_empty() {
                return Err(AppError::validation(format!(
                    "server reported {} errors",
                    stats.errors.len()
                )));
            }
        }

        Command::Validate => {
            for name in config.scrapers.keys() {
                Scraper::from_config(name, &config)?;
            }
            log::info!(
                "Config OK: {} scrapers, database {} (override with {})",
                config.scrapers.len(),
                config.storage.url,
                DB_ENV_VAR
            );
        }
    }

    Ok(())
}
