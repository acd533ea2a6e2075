use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use patrolbot_core::api::{
    FeedQuery, MediaWikiClient, MediaWikiClientConfig, WikiReadApi, WikiWriteApi,
};
use patrolbot_core::config::{BotConfig, load_config};
use patrolbot_core::onwiki_log::OnWikiLog;
use patrolbot_core::review::ReviewController;
use patrolbot_core::title::Title;
use patrolbot_core::verify::{self, ForumSettings, Verification};

#[derive(Debug, Parser)]
#[command(
    name = "patrolbot",
    version,
    about = "Reviews new-pages feed entries whose deletion nominations check out"
)]
struct Cli {
    /// Path to the bot configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "patrolbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sweep the unreviewed feed and reconcile the on-wiki log
    Run(RunArgs),
    /// Verify a single page and print the verdict without writing anything
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Keep sweeping on a fixed interval instead of exiting
    #[arg(long)]
    forever: bool,
    /// Seconds to sleep between sweeps with --forever
    #[arg(long, value_name = "SECONDS", default_value_t = 1800)]
    sleep_secs: u64,
    /// Print each sweep report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Mainspace title of the page to verify
    title: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Commands::Run(args) => run_sweeps(&config, &args),
        Commands::Check(args) => run_check(&config, &args.title),
    }
}

fn run_sweeps(config: &BotConfig, args: &RunArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting");
    let mut api = login_client(config)?;
    loop {
        let mut controller = ReviewController::new(
            ForumSettings::from_config(config),
            OnWikiLog::from_config(config),
            FeedQuery::from_config(config),
        );
        let report = controller.run(&mut api)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "scanned {} entries: {} reviewed, {} flagged, {} skipped, {} vanished ({} API requests)",
                report.scanned,
                report.reviewed,
                report.flagged,
                report.skipped,
                report.vanished,
                report.request_count
            );
        }
        if !args.forever {
            return Ok(());
        }
        info!(sleep_secs = args.sleep_secs, "sweep finished; sleeping");
        sleep(Duration::from_secs(args.sleep_secs));
    }
}

fn run_check(config: &BotConfig, raw_title: &str) -> Result<()> {
    let mut api = read_client(config)?;
    let title = Title::mainspace(raw_title);
    let Some(page) = api.fetch_page(&title)? else {
        bail!("page does not exist: {title}");
    };
    let outcome = verify::classify(&mut api, &ForumSettings::from_config(config), &page)?;
    match outcome.verification {
        Verification::NotNominated => {
            println!("{title}: no deletion nomination on the page");
        }
        Verification::Filed => {
            println!("{title}: nomination filed and visible; would be marked reviewed");
        }
        Verification::Unfiled | Verification::FiledNotTranscluded => {
            if let Some((code, log_title)) = &outcome.skip {
                println!("{title}: {} ({})", code.render(&title, log_title), code.as_str());
            }
        }
    }
    Ok(())
}

fn read_client(config: &BotConfig) -> Result<MediaWikiClient> {
    MediaWikiClient::new(MediaWikiClientConfig::from_config(config))
}

fn login_client(config: &BotConfig) -> Result<MediaWikiClient> {
    let username = require_env("WIKI_BOT_USER")?;
    let password = require_env("WIKI_BOT_PASS")?;
    let mut client = read_client(config)?;
    client
        .login(username.trim(), password.trim())
        .context("login failed")?;
    info!(user = username.trim(), "logged in");
    Ok(client)
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{key} must be set (via the environment or an .env file)"),
    }
}
