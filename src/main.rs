//! # Resclaw — Reservation Dispatch Service
//!
//! Schedules reservation slots, dispatches one UiPath request per OPEN
//! customer when a slot fires, and reconciles the asynchronous callbacks the
//! automation sends back.
//!
//! Usage:
//!   resclaw                          # Start with ~/.resclaw/config.toml
//!   resclaw --config ./dev.toml      # Custom config
//!   resclaw --port 8080              # Override the gateway port

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use resclaw_core::ResclawConfig;
use resclaw_db::ReservationDb;
use resclaw_scheduler::SlotScheduler;
use resclaw_uipath::UiPathClient;

#[derive(Parser)]
#[command(
    name = "resclaw",
    version,
    about = "Reservation dispatch service with UiPath automation callbacks"
)]
struct Cli {
    /// Path to config file (default: ~/.resclaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway host override
    #[arg(long)]
    host: Option<String>,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Database path override
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "resclaw=debug,tower_http=debug"
    } else {
        "resclaw=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config, then apply CLI overrides
    let mut config = match &cli.config {
        Some(path) => ResclawConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => ResclawConfig::load()?,
    };
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(db_path) = cli.db_path {
        config.database.path = db_path;
    }

    // Secrets prefer env vars over the config file
    if let Ok(key) = std::env::var("UIPATH_API_KEY") {
        config.uipath.api_key = key;
    }
    if let Ok(secret) = std::env::var("UIPATH_CLIENT_SECRET") {
        config.uipath.client_secret = secret;
    }
    if let Ok(token) = std::env::var("RESCLAW_ADMIN_TOKEN") {
        config.gateway.admin_token = token;
    }

    if config.gateway.admin_token.is_empty() {
        tracing::warn!("No admin token configured — admin routes are open. Set RESCLAW_ADMIN_TOKEN for production.");
    }

    // Open database
    let db_path = expand_path(&config.database.path);
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(
        ReservationDb::open(std::path::Path::new(&db_path)).map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    // UiPath client + slot scheduler
    let client = Arc::new(UiPathClient::new(&config.uipath));
    let scheduler = SlotScheduler::new(db.clone(), client, config.scheduler.grace_secs);

    // Re-arm timers for slots that survived a restart
    let (rearmed, skipped) = scheduler
        .recover_pending()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("📋 Resclaw v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   🌐 Gateway:   http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("   🗄️  Database:  {db_path}");
    println!("   🤖 UiPath:    {}", if config.uipath.api_url.is_empty() {
        "(not configured)"
    } else {
        config.uipath.api_url.as_str()
    });
    println!("   ⏰ Timers:    {rearmed} re-armed, {skipped} stale slot(s) skipped");
    println!();

    resclaw_gateway::start(&config.gateway, db, scheduler).await?;
    Ok(())
}
