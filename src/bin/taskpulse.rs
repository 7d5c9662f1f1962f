use anyhow::{Context, Result};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::env;
use std::path::PathBuf;
use taskpulse::config::{Backend, Config};
use taskpulse::context::{AppContext, StandardContext};
use taskpulse::estimator::DurationEstimator;
use taskpulse::provider::{CalDavProvider, LocalProvider, TaskProvider};
use taskpulse::scheduler::{LearningStore, SyncScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args
        .iter()
        .any(|a| a == "--help" || a == "-h" || a == "help")
    {
        print_help();
        return Ok(());
    }

    let root = args
        .iter()
        .position(|a| a == "--root")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);
    let once = args.iter().any(|a| a == "once");

    let ctx = StandardContext::new(root);
    let config = match Config::load(&ctx) {
        Ok(c) => c,
        Err(e) if Config::is_missing_config_error(&e) => {
            let path = Config::get_path_string(&ctx)?;
            eprintln!("No configuration found. Create one at {}", path);
            eprintln!("Run 'taskpulse --help' for the available keys.");
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    init_logging(&config.log_level);
    log::info!("Using {} backend", config.backend);

    match config.backend {
        Backend::CalDav => {
            let provider = CalDavProvider::connect(&config)
                .context("Failed to set up the CalDAV connection")?;
            run(provider, &config, &ctx, once).await
        }
        Backend::Local => {
            let provider = LocalProvider::from_context(&ctx)?;
            run(provider, &config, &ctx, once).await
        }
    }
}

fn init_logging(level: &str) {
    let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    if TermLogger::init(
        filter,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .is_err()
    {
        eprintln!("Logger already initialised");
    }
}

async fn run<P: TaskProvider + 'static>(
    provider: P,
    config: &Config,
    ctx: &dyn AppContext,
    once: bool,
) -> Result<()> {
    let estimator = DurationEstimator::from_config(&config.estimator);
    let mut scheduler = SyncScheduler::new(provider, estimator, &config.scheduler);
    if config.scheduler.persist_learning {
        scheduler = scheduler.with_learning(LearningStore::from_context(ctx)?)?;
    }

    if once {
        scheduler.check_in().await?;
        let snapshot = scheduler.latest();
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        return Ok(());
    }

    let handle = scheduler.spawn();
    let mut snapshots = handle.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let d = &snapshot.diagnostics;
                log::info!(
                    "{} calendar(s), {} task(s), {} pending; {} warning(s), {} calendar error(s), {} failed check-in(s)",
                    snapshot.calendars.len(),
                    snapshot.task_count(),
                    snapshot.pending().count(),
                    d.parse_warnings.len(),
                    d.calendar_errors.len(),
                    d.failed_check_ins
                );
            }
        }
    }

    let scheduler = handle.join().await?;
    for (category, profile) in scheduler.estimator().profiles() {
        log::info!(
            "Estimate '{}': {:.1} min over {} observation(s)",
            category,
            profile.estimate,
            profile.observations
        );
    }
    Ok(())
}

fn print_help() {
    println!(
        "taskpulse v{} - task sync with learned duration estimates",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    taskpulse [--root <dir>]           Run check-ins until Ctrl-C");
    println!("    taskpulse once [--root <dir>]      Run one check-in, print the snapshot as JSON");
    println!("    taskpulse --help                   Show this help message");
    println!();
    println!("CONFIG (config.toml):");
    println!("    backend = \"caldav\" | \"local\"");
    println!("    url, username, password, allow_insecure_certs, request_timeout_secs, log_level");
    println!("    [scheduler] interval_secs, backoff_base_secs, backoff_max_secs, persist_learning");
    println!("    [estimator] alpha, default_minutes, first_observation = \"adopt\" | \"blend\"");
}
