mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use minescan::blacklist::Blacklist;
use minescan::config::{self, Config, DatabaseType, DiscoveryMethod, GeoProviderKind};
use minescan::coordinator::{CoordinatorConfig, ScanCoordinator, ScanState};
use minescan::discovery::TargetSpec;
use minescan::export::{self, ExportFormat};
use minescan::geolocation::{GeoProvider, GeolocationClient};
use minescan::protocol::ProbeConfig;
use minescan::store::{PostgresStore, SqliteStore, Store};
use minescan::webhook::{WebhookConfig, WebhookObserver};

const EXIT_OK: u8 = 0;
const EXIT_RUNTIME_ERROR: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_INTERRUPT: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::InitConfig => {
            config::write(&cli.config, &Config::default())
                .map_err(|e| anyhow::anyhow!(e))
                .context("writing default configuration")?;
            println!("wrote default configuration to {}", cli.config.display());
            Ok(EXIT_OK)
        }
        Commands::ValidateConfig => match config::load_or_init(&cli.config) {
            Ok(_) => {
                println!("{} is valid", cli.config.display());
                Ok(EXIT_OK)
            }
            Err(e) => {
                eprintln!("invalid configuration: {e}");
                Ok(EXIT_CONFIG_ERROR)
            }
        },
        Commands::Version => {
            println!("minescan {}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_OK)
        }
        Commands::Scan { range, file } => run_scan(&cli.config, range, file).await,
        Commands::Export { format, output } => run_export(&cli.config, format, output).await,
        Commands::ImportBlacklist { path } => run_import_blacklist(&cli.config, path).await,
        Commands::Stats => run_stats(&cli.config).await,
        Commands::Search { query } => run_search(&cli.config, query).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    config::load_or_init(path).map_err(|e| anyhow::anyhow!(e))
}

async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.database.db_type {
        DatabaseType::Sqlite => {
            let path = config
                .database
                .path
                .as_deref()
                .unwrap_or("minescan.db");
            Arc::new(SqliteStore::connect(path).await.map_err(|e| anyhow::anyhow!(e))?)
        }
        DatabaseType::Postgresql => {
            let host = config.database.host.as_deref().unwrap_or("localhost");
            let port = config.database.port.unwrap_or(5432);
            let database = config.database.database.as_deref().unwrap_or("minescan");
            let user = config.database.user.as_deref().unwrap_or("postgres");
            let password = config.database.password.as_deref().unwrap_or("");
            let url = format!("postgres://{user}:{password}@{host}:{port}/{database}");
            let pool_size = config.database.pool_size.unwrap_or(5);
            Arc::new(
                PostgresStore::connect(&url, pool_size)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?,
            )
        }
    };
    Ok(store)
}

fn build_blacklist(config: &Config) -> Arc<Blacklist> {
    if config.blacklist.enabled {
        if let Some(path) = &config.blacklist.file_path {
            return Arc::new(Blacklist::with_file(path));
        }
    }
    Arc::new(Blacklist::new())
}

fn build_probe_config(config: &Config) -> ProbeConfig {
    ProbeConfig {
        timeout: Duration::from_secs_f64(config.scanner.timeout),
        protocol_version: config.scanner.protocol_version,
        scan_all_protocols: config.scanner.scan_all_protocols,
        protocol_versions: config.scanner.protocol_versions.clone(),
        retries: config.scanner.retries,
        legacy_support: config.scanner.legacy_support,
    }
}

fn target_spec_from_config(config: &Config, range: Option<String>, file: Option<std::path::PathBuf>) -> Result<TargetSpec> {
    if let Some(path) = file {
        return Ok(TargetSpec::File {
            path,
            ports: config.discovery.ports.clone(),
        });
    }
    let Some(range) = range else {
        return Err(anyhow::anyhow!("either --range or --file is required"));
    };

    if matches!(config.discovery.method, DiscoveryMethod::Masscan) {
        let ports = config
            .discovery
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut args = vec![
            range.clone(),
            "-p".to_string(),
            ports,
            "--rate".to_string(),
            config.discovery.masscan_rate.unwrap_or(10000).to_string(),
        ];
        if let Some(excludes) = &config.discovery.masscan_excludes {
            args.push("--excludefile".to_string());
            args.push(excludes.clone());
        }
        return Ok(TargetSpec::External {
            command: "masscan".to_string(),
            args,
        });
    }

    let cidr = range.parse().with_context(|| format!("invalid CIDR {range}"))?;
    Ok(TargetSpec::Range {
        cidr,
        ports: config.discovery.ports.clone(),
    })
}

async fn run_scan(config_path: &Path, range: Option<String>, file: Option<std::path::PathBuf>) -> Result<u8> {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    let store = open_store(&config).await?;
    let blacklist = build_blacklist(&config);
    if config.blacklist.enabled {
        blacklist.reload_from_file().await.ok();
        if let Ok(entries) = store.list_blacklist().await {
            blacklist.load_store_entries(&entries);
        }
    }

    let geo = if config.geolocation.enabled {
        let provider = match config.geolocation.provider {
            GeoProviderKind::Geoip2 => GeoProvider::Geoip2,
            GeoProviderKind::Ipapi => GeoProvider::IpApi,
        };
        Some(Arc::new(GeolocationClient::new(
            provider,
            Duration::from_secs(config.geolocation.cache_duration),
        )))
    } else {
        None
    };

    let coordinator_config = CoordinatorConfig {
        probe: build_probe_config(&config),
        rate_limit: config.scanner.rate_limit,
        max_concurrent: config.concurrency.max_concurrent,
        max_connections_per_host: config.concurrency.max_connections_per_host,
        max_memory_mb: config.memory.max_memory_mb,
        gc_interval: config.memory.gc_interval,
        memory_monitoring_enabled: config.memory.enable_monitoring,
        batch_size: config.concurrency.batch_size,
    };

    let blacklist_for_watch = Arc::clone(&blacklist);
    let coordinator = Arc::new(ScanCoordinator::new(store, blacklist, coordinator_config, geo));

    if config.webhook.enabled {
        if let Some(url) = config.webhook.url.clone() {
            let observer = Arc::new(WebhookObserver::new(WebhookConfig {
                url,
                batch_size: config.webhook.batch_size,
                include_stats: config.webhook.include_stats,
            }));
            coordinator.add_observer(observer).await;
        }
    }

    let target_spec = match target_spec_from_config(&config, range, file) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{e}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    if config.blacklist.enabled && config.blacklist.auto_update {
        let watcher_blacklist = Arc::clone(&blacklist_for_watch);
        let watcher_coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                if watcher_coordinator.state() == ScanState::Stopped {
                    return;
                }
                if watcher_blacklist.file_changed().await {
                    log::info!("blacklist file changed, reloading");
                    if let Err(e) = watcher_blacklist.reload_from_file().await {
                        log::warn!("failed to reload blacklist file: {e}");
                    }
                }
            }
        });
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_coordinator = Arc::clone(&coordinator);
    let signal_interrupted = Arc::clone(&interrupted);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        log::info!("received shutdown signal, stopping scan");
        signal_interrupted.store(true, Ordering::SeqCst);
        signal_coordinator.stop();
    });

    coordinator.start(target_spec).await.map_err(|e| anyhow::anyhow!(e))?;

    let stats = coordinator.stats().await;
    log::info!(
        "scan complete: {} scanned, {} found, {} errors, {} blacklisted",
        stats.total_scanned,
        stats.servers_found,
        stats.errors,
        stats.blacklisted_skipped
    );

    if interrupted.load(Ordering::SeqCst) {
        Ok(EXIT_INTERRUPT)
    } else {
        Ok(EXIT_OK)
    }
}

async fn run_export(config_path: &Path, format: Option<String>, output: std::path::PathBuf) -> Result<u8> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let format = match format
        .as_deref()
        .and_then(ExportFormat::parse)
        .or_else(|| ExportFormat::from_extension(&output))
    {
        Some(f) => f,
        None => {
            eprintln!("could not determine export format; pass --format or use a .json/.csv/.xlsx extension");
            return Ok(EXIT_RUNTIME_ERROR);
        }
    };

    let count = store.count_endpoints().await.map_err(|e| anyhow::anyhow!(e))?;
    let endpoints = store
        .list_endpoints(count.max(0), 0)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    export::export(&endpoints, format, &output).map_err(|e| anyhow::anyhow!(e))?;
    println!("exported {} endpoints to {}", endpoints.len(), output.display());
    Ok(EXIT_OK)
}

async fn run_import_blacklist(config_path: &Path, path: std::path::PathBuf) -> Result<u8> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let blacklist = Blacklist::with_file(&path);
    blacklist.reload_from_file().await.context("reading blacklist file")?;

    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut imported = 0u32;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let ip_or_cidr = line.split(',').next().unwrap_or(line).trim().to_string();
        let entry = minescan::model::BlacklistEntry {
            ip_or_cidr,
            reason: None,
            added_by: "import-blacklist".to_string(),
            added_time: chrono::Utc::now(),
            notes: None,
        };
        if store.add_blacklist_entry(&entry).await.is_ok() {
            imported += 1;
        }
    }
    println!("imported {imported} blacklist entries from {}", path.display());
    Ok(EXIT_OK)
}

async fn run_stats(config_path: &Path) -> Result<u8> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let total = store.count_endpoints().await.map_err(|e| anyhow::anyhow!(e))?;
    let players = store.distinct_player_count().await.map_err(|e| anyhow::anyhow!(e))?;
    let mods = store.distinct_mod_count().await.map_err(|e| anyhow::anyhow!(e))?;
    let by_version = store.group_by_version().await.map_err(|e| anyhow::anyhow!(e))?;
    let by_software = store.group_by_software().await.map_err(|e| anyhow::anyhow!(e))?;

    println!("endpoints tracked: {total}");
    println!("distinct players seen: {players}");
    println!("distinct mods seen: {mods}");
    println!("by version:");
    for (version, count) in by_version.iter().take(10) {
        println!("  {version}: {count}");
    }
    println!("by software:");
    for (software, count) in by_software.iter().take(10) {
        println!("  {software}: {count}");
    }
    Ok(EXIT_OK)
}

async fn run_search(config_path: &Path, query: String) -> Result<u8> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let count = store.count_endpoints().await.map_err(|e| anyhow::anyhow!(e))?;
    let endpoints = store
        .list_endpoints(count.max(0), 0)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let matches: Vec<_> = endpoints
        .into_iter()
        .filter(|e| e.key.to_string().contains(&query))
        .collect();

    if matches.is_empty() {
        println!("no endpoints matched {query:?}");
    }
    for endpoint in &matches {
        println!(
            "{} availability={:.1}% scans={}",
            endpoint.key, endpoint.availability_pct, endpoint.total_scans
        );
    }
    Ok(EXIT_OK)
}
