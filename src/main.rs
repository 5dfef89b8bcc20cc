//! dosload - CLI Entry Point
//!
//! Commands:
//! - `dosload run <archive> <program>` - Load the driver and mount/launch against the headless host module
//! - `dosload probe <url>` - Download a URL and report what arrived
//! - `dosload config` - Print the effective configuration

use clap::{Parser, Subcommand};
use dosload::{Controller, HostModule, HttpFetcher, LoaderConfig, LoaderOptions, LogStatus, StatusSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dosload")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "Loader and control surface for a precompiled DOS emulation module")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Base URL for relative script and archive URLs
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the driver, mount an archive and launch a program
    Run {
        /// Archive URL (absolute, or relative to --base-url)
        archive: String,
        /// Program to launch from the archive
        program: String,
        /// Driver script URL
        #[arg(long)]
        script_url: Option<String>,
        /// Log status lines instead of drawing a loading bar
        #[arg(long)]
        plain: bool,
    },
    /// Download a URL and report its size
    Probe {
        /// URL to fetch
        url: String,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let plain = !matches!(cli.command, Some(Commands::Run { plain: false, .. }));
    init_logging(plain);

    let mut config = load_config(cli.config.as_deref());
    if let Some(base_url) = cli.base_url {
        config.base_url = Some(base_url);
    }

    match cli.command {
        Some(Commands::Run { archive, program, script_url, plain }) => {
            if let Some(script_url) = script_url {
                config.script_url = script_url;
            }
            run_program(config, &archive, &program, plain).await;
        }
        Some(Commands::Probe { url }) => {
            probe_url(&config, &url).await;
        }
        Some(Commands::Config) => {
            print_config(&config);
        }
        None => {
            println!("dosload v0.1.0");
            println!("Loader for a precompiled DOS emulation module");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn init_logging(plain: bool) {
    // A loading bar owns stdout; keep log noise down unless asked for.
    let default = if plain { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> LoaderConfig {
    let Some(path) = path else {
        return LoaderConfig::default();
    };

    match LoaderConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

#[cfg_attr(not(feature = "tui"), allow(unused_variables))]
fn status_sink(config: &LoaderConfig, plain: bool) -> Box<dyn StatusSink> {
    #[cfg(feature = "tui")]
    if !plain {
        match dosload::TerminalStatus::new(config.driver_name.clone()) {
            Ok(sink) => return Box::new(sink),
            Err(e) => tracing::warn!("loading bar unavailable, falling back to log output: {e}"),
        }
    }

    Box::new(LogStatus::new())
}

async fn run_program(config: LoaderConfig, archive: &str, program: &str, plain: bool) {
    println!("🔧 Loading {} for {}", archive, program);

    let status = status_sink(&config, plain);
    let options = LoaderOptions::new()
        .on_load(|outcome| {
            if outcome.is_ok() {
                tracing::info!("driver ready");
            }
        })
        .on_run(|program| tracing::info!(program, "starting program"));

    let mut controller = match Controller::new(HostModule::new(), HttpFetcher::new(), status, config, options) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if let Err(e) = controller.start().await {
        controller.status_mut().hide_loader();
        eprintln!("❌ Failed to load driver: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = controller.run(archive, program).await {
        controller.status_mut().hide_loader();
        eprintln!("❌ Failed to run {}: {}", program, e);
        std::process::exit(1);
    }

    let module = controller.module();
    println!();
    println!("━━━ Result ━━━");
    println!("State:    {}", controller.state());
    for mounted in module.mounted_archives() {
        println!("Mounted:  {} bytes", mounted.len);
    }
    println!("Launched: {}", module.launched_program().unwrap_or("-"));
    println!("Buffers still allocated: {}", module.live_allocations());
}

async fn probe_url(config: &LoaderConfig, raw: &str) {
    use dosload::fetch::{resolve_url, Fetch};
    use tokio_util::sync::CancellationToken;

    let base = match config.base_url() {
        Ok(base) => base,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let url = match resolve_url(base.as_ref(), raw) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("📡 Fetching: {}", dosload::fetch::redact_url_for_logs(&url));

    let mut updates = 0u64;
    let mut last = dosload::Progress::default();
    let fetched = HttpFetcher::new()
        .fetch(&url, &CancellationToken::new(), &mut |progress| {
            updates += 1;
            last = progress;
        })
        .await;

    let body = match fetched {
        Ok(body) => body,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ {} bytes in {} progress updates", body.len(), updates);
    match last.expected {
        Some(total) => println!("  Announced size: {} bytes", total),
        None => println!("  Announced size: unknown"),
    }
    let signature = body.get(..4).unwrap_or(&body);
    println!("  Leading bytes: {:02X?}", signature);
}

fn print_config(config: &LoaderConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("❌ Failed to serialize config: {}", e);
            std::process::exit(1);
        }
    }
}
