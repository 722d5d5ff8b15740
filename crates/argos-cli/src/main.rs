use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use argos_client::{EngineKind, EngineLauncher, OutboundNotifier, ReqwestRobotsPolicy};
use argos_core::traits::{RegistrationStore, SiteConfigSource};
use argos_core::{
    Scheduler, SchedulerConfig, ScrapeRequest, ScrapeService, ScrapeServiceConfig,
    SiteConfigLoader, SiteRegistration,
};
use argos_store::{FileResultStore, JsonRegistrationStore, Store, StoreConfig};

#[derive(Parser)]
#[command(name = "argos", version, about = "Robots-aware scraping engine")]
struct Cli {
    /// Directory of site configuration files
    #[arg(long, global = true, env = "ARGOS_SITES_DIR", default_value = "./sites")]
    sites_dir: PathBuf,

    /// Root for registrations, results and screenshots
    #[arg(long, global = true, env = "ARGOS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Page engine: "browser" (Chromium) or "http" (no JavaScript)
    #[arg(long, global = true, env = "ARGOS_ENGINE")]
    engine: Option<EngineKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one URL with its matching site configuration and print the result
    Scrape {
        /// Target URL
        url: String,

        /// Capture a full-page screenshot
        #[arg(long, default_value_t = false)]
        screenshot: bool,

        /// Skip iframe traversal
        #[arg(long, default_value_t = false)]
        no_frames: bool,

        /// Deadline for the whole scrape, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Inspect site configuration files
    Sites {
        #[command(subcommand)]
        command: SitesCommand,
    },

    /// Manage sites registered for periodic scraping
    Registrations {
        #[command(subcommand)]
        command: RegistrationsCommand,
    },

    /// Run the scheduler
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Manage stored results
    Results {
        #[command(subcommand)]
        command: ResultsCommand,
    },
}

#[derive(Subcommand)]
enum SitesCommand {
    /// List valid configurations
    List,
    /// Validate every file and report errors; exits non-zero if any is invalid
    Validate,
}

#[derive(Subcommand)]
enum RegistrationsCommand {
    /// Register a site configuration file, or update an existing registration
    Add {
        /// Site configuration JSON file
        config: PathBuf,

        /// URL to scrape on each run (repeatable; defaults to the site root)
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// Days between runs
        #[arg(short, long, default_value_t = 1)]
        interval_days: u32,

        /// Higher runs first when the concurrency cap is reached
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
    },
    /// List registered sites
    List,
    /// Resume scheduling a site
    Enable { site_id: String },
    /// Stop scheduling a site without removing it
    Disable { site_id: String },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// Run the periodic loop in the foreground until Ctrl+C
    Run {
        #[arg(long, env = "ARGOS_SCHEDULER_INTERVAL_SECS", default_value_t = 86_400)]
        interval_secs: u64,

        #[arg(long, env = "ARGOS_MAX_CONCURRENT_JOBS", default_value_t = 3)]
        max_concurrent_jobs: usize,
    },
    /// Launch every due site once and wait for the jobs to finish
    Tick {
        #[arg(long, env = "ARGOS_MAX_CONCURRENT_JOBS", default_value_t = 3)]
        max_concurrent_jobs: usize,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 900)]
        wait_secs: u64,
    },
}

#[derive(Subcommand)]
enum ResultsCommand {
    /// Delete day directories older than the retention window
    Prune {
        #[arg(long, default_value_t = 30)]
        keep_days: u32,
    },
    /// List result files stored for a day (today by default)
    List {
        /// Day as YYYY-MM-DD
        #[arg(long)]
        day: Option<chrono::NaiveDate>,
    },
}

type LiveScraper = ScrapeService<EngineLauncher, ReqwestRobotsPolicy, SiteConfigLoader>;
type LiveScheduler =
    Scheduler<LiveScraper, JsonRegistrationStore, FileResultStore, OutboundNotifier>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("argos=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store_config = StoreConfig::default()
        .with_data_dir(&cli.data_dir)
        .with_sites_dir(&cli.sites_dir);
    let engine = cli.engine.unwrap_or_default();

    match cli.command {
        Commands::Scrape {
            url,
            screenshot,
            no_frames,
            timeout_ms,
        } => {
            let mut request = ScrapeRequest::new(url).without_cache();
            request.options.screenshot = screenshot;
            request.options.include_frames = !no_frames;
            request.options.timeout_ms = timeout_ms;
            cmd_scrape(&store_config, engine, &request).await?;
        }
        Commands::Sites { command } => match command {
            SitesCommand::List => cmd_sites_list(&store_config).await?,
            SitesCommand::Validate => cmd_sites_validate(&store_config).await?,
        },
        Commands::Registrations { command } => {
            let store = open_store(&store_config).await?;
            match command {
                RegistrationsCommand::Add {
                    config,
                    urls,
                    interval_days,
                    priority,
                } => cmd_register(&store, &config, urls, interval_days, priority).await?,
                RegistrationsCommand::List => cmd_registrations_list(&store).await?,
                RegistrationsCommand::Enable { site_id } => {
                    cmd_set_enabled(&store, &site_id, true).await?
                }
                RegistrationsCommand::Disable { site_id } => {
                    cmd_set_enabled(&store, &site_id, false).await?
                }
            }
        }
        Commands::Schedule { command } => match command {
            ScheduleCommand::Run {
                interval_secs,
                max_concurrent_jobs,
            } => {
                let config = SchedulerConfig::default()
                    .with_interval(Duration::from_secs(interval_secs.max(1)))
                    .with_max_concurrent_jobs(max_concurrent_jobs.max(1));
                cmd_schedule_run(&store_config, engine, config).await?;
            }
            ScheduleCommand::Tick {
                max_concurrent_jobs,
                wait_secs,
            } => {
                let config =
                    SchedulerConfig::default().with_max_concurrent_jobs(max_concurrent_jobs.max(1));
                cmd_schedule_tick(&store_config, engine, config, Duration::from_secs(wait_secs))
                    .await?;
            }
        },
        Commands::Results { command } => {
            let store = open_store(&store_config).await?;
            let today = chrono::Utc::now().date_naive();
            match command {
                ResultsCommand::Prune { keep_days } => {
                    let removed = store
                        .results()
                        .prune_older_than(keep_days, today)
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                    println!("Removed {removed} day directories older than {keep_days} days");
                }
                ResultsCommand::List { day } => {
                    let files = store
                        .results()
                        .list_day(day.unwrap_or(today))
                        .await
                        .map_err(|e| anyhow::anyhow!(e))?;
                    for file in &files {
                        println!("{}", file.display());
                    }
                    println!("\nTotal: {} results", files.len());
                }
            }
        }
    }

    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Store> {
    Store::open(config.clone())
        .await
        .with_context(|| format!("Failed to open store at {}", config.data_dir.display()))
}

fn build_scraper(config: &StoreConfig, engine: EngineKind) -> Result<LiveScraper> {
    let launcher = EngineLauncher::new(engine).context("Failed to set up page engine")?;
    let robots = ReqwestRobotsPolicy::new().context("Failed to create robots.txt client")?;
    Ok(ScrapeService::with_config(
        launcher,
        robots,
        SiteConfigLoader::new(config.sites_dir()),
        ScrapeServiceConfig::default().with_screenshot_dir(config.screenshots_dir()),
    ))
}

async fn cmd_scrape(config: &StoreConfig, engine: EngineKind, request: &ScrapeRequest) -> Result<()> {
    let scraper = build_scraper(config, engine)?;

    tracing::info!(url = %request.url, engine = ?engine, "Scraping");
    let result = scraper.execute(request).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!(
            "scrape failed ({}): {}",
            result.error_kind.as_deref().unwrap_or("unknown"),
            result.errors.join("; ")
        );
    }
    Ok(())
}

async fn cmd_sites_list(config: &StoreConfig) -> Result<()> {
    let loader = SiteConfigLoader::new(config.sites_dir());
    let sites = loader.list().await.map_err(|e| anyhow::anyhow!(e))?;

    if sites.is_empty() {
        println!("No site configurations in {}", config.sites_dir().display());
        return Ok(());
    }

    for site in &sites {
        let state = if site.enabled { "enabled" } else { "disabled" };
        println!(
            "  {} ({}) [{}] v{}: {} instructions, {} extractors",
            site.id,
            site.domain,
            state,
            site.version,
            site.instructions.len(),
            site.extractors.len()
        );
    }
    println!("\nTotal: {} sites", sites.len());

    Ok(())
}

async fn cmd_sites_validate(config: &StoreConfig) -> Result<()> {
    let loader = SiteConfigLoader::new(config.sites_dir());
    let report = loader.validate_dir().await.map_err(|e| anyhow::anyhow!(e))?;

    let mut invalid = 0;
    for file in &report {
        match &file.result {
            Ok(site) => println!("  [ok]      {} ({})", file.path.display(), site.id),
            Err(e) => {
                invalid += 1;
                println!("  [invalid] {}: {e}", file.path.display());
            }
        }
    }
    println!("\n{} files, {} invalid", report.len(), invalid);

    if invalid > 0 {
        anyhow::bail!("{invalid} invalid site configuration(s)");
    }
    Ok(())
}

async fn cmd_register(
    store: &Store,
    config_path: &Path,
    urls: Vec<String>,
    interval_days: u32,
    priority: i32,
) -> Result<()> {
    let site = SiteConfigLoader::load_file(config_path)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Invalid site configuration: {}", config_path.display()))?;

    for url in &urls {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid target URL: {url}"))?;
        if !site.matches(&parsed) {
            anyhow::bail!("{url} is not covered by site '{}' ({})", site.id, site.domain);
        }
    }

    let registrations = store.registrations();
    // Keep scheduling history when re-registering
    let mut registration = match registrations
        .get(&site.id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
    {
        Some(mut existing) => {
            existing.site = site;
            existing
        }
        None => SiteRegistration::new(site),
    };
    registration.target_urls = urls;
    registration.check_interval_days = interval_days.max(1);
    registration.priority = priority;

    registrations
        .upsert(&registration)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(site_id = %registration.id(), "Site registered");
    println!("Registered {}", registration.id());
    Ok(())
}

async fn cmd_registrations_list(store: &Store) -> Result<()> {
    let all = store
        .registrations()
        .list()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if all.is_empty() {
        println!("No registered sites");
        return Ok(());
    }

    for reg in &all {
        let next = reg
            .next_check_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "due".to_string());
        println!(
            "  {} [{}] every {}d, priority {}, next: {}, runs: {}, failures: {}",
            reg.id(),
            if reg.site.enabled { "enabled" } else { "disabled" },
            reg.check_interval_days,
            reg.priority,
            next,
            reg.total_runs,
            reg.consecutive_failures,
        );
    }
    println!("\nTotal: {} registrations", all.len());

    Ok(())
}

async fn cmd_set_enabled(store: &Store, site_id: &str, enabled: bool) -> Result<()> {
    let found = store
        .registrations()
        .set_enabled(site_id, enabled)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    if !found {
        anyhow::bail!("No registration with id '{site_id}'");
    }
    println!("{site_id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

async fn build_scheduler(
    config: &StoreConfig,
    engine: EngineKind,
    scheduler_config: SchedulerConfig,
) -> Result<LiveScheduler> {
    let store = open_store(config).await?;
    let scraper = build_scraper(config, engine)?;
    let webhook = std::env::var("ARGOS_NOTIFY_WEBHOOK").ok();
    let notifier = OutboundNotifier::from_endpoint(webhook.as_deref().filter(|w| !w.is_empty()))
        .context("Invalid ARGOS_NOTIFY_WEBHOOK")?;

    Ok(Scheduler::new(
        scraper,
        store.registrations(),
        store.results(),
        notifier,
        scheduler_config,
    ))
}

async fn cmd_schedule_run(
    config: &StoreConfig,
    engine: EngineKind,
    scheduler_config: SchedulerConfig,
) -> Result<()> {
    let scheduler = build_scheduler(config, engine, scheduler_config).await?;
    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    tracing::info!("Shutdown signal received");

    let report = scheduler.stop().await;
    println!(
        "Scheduler stopped: {} jobs drained, {} abandoned",
        report.drained, report.abandoned
    );
    Ok(())
}

async fn cmd_schedule_tick(
    config: &StoreConfig,
    engine: EngineKind,
    scheduler_config: SchedulerConfig,
    wait: Duration,
) -> Result<()> {
    let scheduler = build_scheduler(config, engine, scheduler_config).await?;

    let tick = scheduler.run_once().await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        due = tick.due,
        launched = tick.launched.len(),
        deferred = tick.deferred.len(),
        "Tick complete"
    );

    if !scheduler.wait_idle(wait).await {
        tracing::warn!("Jobs still running after {}s, stopping", wait.as_secs());
        scheduler.stop().await;
    }

    let status = scheduler.status().await;
    println!("{}", serde_json::to_string_pretty(&status.recent_jobs)?);
    Ok(())
}
