use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use url::Url;

use job_watch::config::Settings;
use job_watch::db::{self, SqliteStore};
use job_watch::fetch;
use job_watch::filter::RuleSet;
use job_watch::notify::{self, LogNotifier, Notifier};
use job_watch::parser::ExtractOptions;
use job_watch::pipeline::{CycleStats, Pipeline};
use job_watch::record::JobRecord;
use job_watch::report::{self, format_duration, RunSummary};

#[derive(Parser)]
#[command(name = "job_watch", about = "Watch job search pages and notify on new matching postings")]
struct Cli {
    /// Config file (default: ./job_watch.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Init,
    /// Run one fetch → filter → dedup → notify cycle
    Run {
        /// Process saved HTML pages instead of fetching
        #[arg(long, num_args = 1..)]
        html: Vec<PathBuf>,
        /// Base URL for resolving relative links in --html pages
        #[arg(long)]
        base_url: Option<Url>,
        /// Log messages instead of sending them
        #[arg(long)]
        dry_run: bool,
        /// Send a run report after the cycle
        #[arg(long)]
        report: bool,
    },
    /// Run cycles forever on the configured interval
    Watch {
        /// Override interval_minutes
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Show seen/notified counts and run history
    Stats,
    /// Recently admitted jobs
    Recent {
        /// Filter by company (substring)
        #[arg(short, long)]
        company: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Print the active filter rules
    Rules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Database ready at {}", settings.db_path.display());
            Ok(())
        }
        Commands::Run { html, base_url, dry_run, report } => {
            let app = App::new(&settings, dry_run)?;
            let mut store = SqliteStore::open(&settings.db_path)?;
            let cycle = app.cycle(&mut store, &html, base_url.as_ref()).await?;
            cycle.print();
            if report || settings.reports.run_report {
                app.send_run_report(&cycle).await;
            }
            Ok(())
        }
        Commands::Watch { interval } => {
            let app = App::new(&settings, false)?;
            let mut store = SqliteStore::open(&settings.db_path)?;
            let minutes = interval.unwrap_or(settings.scrape.interval_minutes).max(1);
            watch(&app, &mut store, Duration::from_secs(minutes * 60)).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Seen:      {}", s.seen);
            println!("Notified:  {}", s.notified);
            println!("Companies: {}", s.companies);
            println!("Runs:      {} completed, {} failed", s.runs_completed, s.runs_failed);
            println!("Last run:  {}", s.last_run.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::Recent { company, limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_recent(&conn, company.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No jobs yet. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<32} | {:<20} | {:<24} | {:<16} | {:<3}",
                "#", "Title", "Company", "Location", "First seen", "Sent"
            );
            println!("{}", "-".repeat(112));
            for (i, r) in rows.iter().enumerate() {
                let seen: String = r.first_seen.chars().take(16).collect();
                println!(
                    "{:>3} | {:<32} | {:<20} | {:<24} | {:<16} | {:<3}",
                    i + 1,
                    notify::truncate(&r.title, 32),
                    notify::truncate(&r.company, 20),
                    notify::truncate(&r.location, 24),
                    seen,
                    if r.notified { "yes" } else { "no" }
                );
            }
            println!("\n{} jobs", rows.len());
            Ok(())
        }
        Commands::Rules => {
            let rules = RuleSet::from_config(&settings.rules)?;
            for line in rules.summary() {
                println!("{}", line);
            }
            if settings.rules.min_notifications_per_run > 0 {
                println!("Digest at {}+ jobs per run", settings.rules.min_notifications_per_run);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

struct App {
    pipeline: Pipeline,
    notifier: Box<dyn Notifier>,
    client: reqwest::Client,
    settings: Settings,
}

struct CycleReport {
    stats: CycleStats,
    jobs: Vec<JobRecord>,
    pages_failed: usize,
    delivered: usize,
    digest: bool,
    elapsed: Duration,
}

impl CycleReport {
    fn print(&self) {
        let s = &self.stats;
        println!(
            "{} pages ({} failed) | {} extracted, {} unresolvable | {} accepted, {} rejected",
            s.fragments,
            self.pages_failed,
            s.extracted,
            s.unresolvable,
            s.accepted,
            s.rejected()
        );
        for (reason, n) in &s.rejected_by_reason {
            println!("  {:<26} {}", reason, n);
        }
        println!(
            "{} duplicates in batch, {} already seen | {} new, {} delivered{}",
            s.duplicates_in_batch,
            s.already_seen,
            s.novel,
            self.delivered,
            if self.digest { " (digest)" } else { "" }
        );
        println!("Cycle took {}", format_duration(self.elapsed));
    }
}

impl App {
    fn new(settings: &Settings, dry_run: bool) -> anyhow::Result<Self> {
        // Malformed rules stop the process before any fetching
        let rules = RuleSet::from_config(&settings.rules)?;
        info!("Filters: {}", rules.summary().join("; "));

        let extract = ExtractOptions {
            identity: settings.identity,
            include_recommendations: settings.scrape.include_recommendations,
            default_location: settings.scrape.default_location.clone(),
        };
        let client = fetch::client()?;
        let notifier: Box<dyn Notifier> = if dry_run {
            Box::new(LogNotifier)
        } else {
            if settings.telegram.is_none() {
                warn!("No [telegram] section configured, notifications go to the log");
            }
            notify::from_config(client.clone(), settings.telegram.as_ref())
        };

        Ok(Self {
            pipeline: Pipeline::new(rules, extract, settings.rules.min_notifications_per_run),
            notifier,
            client,
            settings: settings.clone(),
        })
    }

    async fn cycle(
        &self,
        store: &mut SqliteStore,
        html: &[PathBuf],
        base_url: Option<&Url>,
    ) -> anyhow::Result<CycleReport> {
        let t = Instant::now();
        let run_id = db::start_run(store.conn(), Utc::now())?;

        match self.cycle_inner(store, html, base_url).await {
            Ok(mut report) => {
                report.elapsed = t.elapsed();
                db::complete_run(store.conn(), run_id, &report.stats, Utc::now())?;
                Ok(report)
            }
            Err(e) => {
                db::fail_run(store.conn(), run_id, &format!("{:#}", e), Utc::now())?;
                Err(e)
            }
        }
    }

    async fn cycle_inner(
        &self,
        store: &mut SqliteStore,
        html: &[PathBuf],
        base_url: Option<&Url>,
    ) -> anyhow::Result<CycleReport> {
        let (fragments, pages_failed) = if html.is_empty() {
            if self.settings.scrape.search_urls.is_empty() {
                anyhow::bail!("No search URLs configured. Set scrape.search_urls or pass --html.");
            }
            let (fragments, stats) = fetch::fetch_fragments(&self.client, &self.settings.scrape).await?;
            (fragments, stats.errors)
        } else {
            (fetch::read_fragments(html, base_url)?, 0)
        };

        let now = Utc::now();
        let batch = self
            .pipeline
            .run_cycle_at(&fragments, store, now)
            .context("Cycle failed")?;

        db::save_jobs(store.conn(), &batch.notify_list, now)?;
        let delivered = notify::deliver(self.notifier.as_ref(), &batch, store, Utc::now()).await?;

        Ok(CycleReport {
            digest: batch.is_digest(),
            stats: batch.stats,
            jobs: batch.notify_list,
            pages_failed,
            delivered,
            elapsed: Duration::ZERO,
        })
    }

    async fn send_run_report(&self, cycle: &CycleReport) {
        let text = report::format_run_report(
            &RunSummary {
                stats: &cycle.stats,
                jobs: &cycle.jobs,
                pages_failed: cycle.pages_failed,
                delivered: cycle.delivered,
                duration: cycle.elapsed,
            },
            Utc::now(),
        );
        if let Err(e) = self.notifier.send(&text).await {
            warn!("Could not send run report: {:#}", e);
        }
    }
}

async fn watch(app: &App, store: &mut SqliteStore, every: Duration) -> anyhow::Result<()> {
    info!("Watching every {}", format_duration(every));
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping after {} cycles", cycles);
                return Ok(());
            }
        }

        cycles += 1;
        match app.cycle(store, &[], None).await {
            Ok(cycle) => {
                cycle.print();
                if app.settings.reports.run_report {
                    app.send_run_report(&cycle).await;
                }
            }
            Err(e) => {
                // Next tick retries
                error!("Cycle {} failed: {:#}", cycles, e);
                let alert = notify::format_error(&format!("{:#}", e), Utc::now());
                if let Err(e) = app.notifier.send(&alert).await {
                    warn!("Could not send error alert: {:#}", e);
                }
            }
        }

        if let Err(e) =
            report::send_due_reports(app.notifier.as_ref(), store.conn(), &app.settings.reports, Utc::now()).await
        {
            warn!("Scheduled reports failed: {:#}", e);
        }
    }
}
