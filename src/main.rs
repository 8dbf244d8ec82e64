use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use log::{error, info, warn};
use std::{io::Write, process, sync::Arc, time::Duration};
use winder_link::{
    WinderLink, config::AppConfig, console::ConsoleRenderer, device::HttpCommandSink,
    http_client::ReqwestTransport, reboot::RebootSequencer, watchdog::CommandWatchdog,
};

type Link = WinderLink<ReqwestTransport, ConsoleRenderer>;
type Sequencer = RebootSequencer<ReqwestTransport, ConsoleRenderer>;
type Watchdog = CommandWatchdog<HttpCommandSink<ReqwestTransport>>;

#[derive(Debug, Parser)]
#[command(author, version, about = "Live state and command link to a kbWinder device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Follow the live status until interrupted (default)")]
    Watch,
    #[command(about = "Print the device configuration")]
    Config,
    #[command(about = "Restart the device and wait until it is back")]
    Restart {
        #[arg(long, default_value = Sequencer::DEFAULT_TARGET)]
        target: String,
    },
    #[command(about = "Start a firmware update and follow its progress")]
    Update,
    #[command(about = "Hold a continuous command for a while, then stop")]
    Jog {
        command: String,
        #[arg(default_value_t = 1000)]
        millis: u64,
    },
    #[command(about = "Scan for WiFi networks")]
    Scan,
    #[command(about = "Compare installed and published firmware")]
    CheckUpdate,
}

fn main() {
    initialize();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create runtime: {e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(Cli::parse())) {
        error!("application error: {e:#}");
        process::exit(1);
    }

    info!("shutdown complete");
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::get().clone();
    info!("device at {}", config.device_base());

    let renderer = Arc::new(ConsoleRenderer::new());
    let link = Link::new(config, Arc::new(ReqwestTransport::default()), renderer.clone())?;

    let result = match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(&link).await,
        Commands::Config => {
            link.load_configuration().await;
            Ok(())
        }
        Commands::Restart { target } => link.restart(&target).await.map(|progress| {
            info!("device back after {} attempts", progress.attempt_count);
        }),
        Commands::Update => update(&link, &renderer).await,
        Commands::Jog { command, millis } => jog(&link, &command, millis).await,
        Commands::Scan => scan(&link).await,
        Commands::CheckUpdate => check_update(&link).await,
    };

    link.shutdown();
    result
}

async fn watch(link: &Link) -> Result<()> {
    if !link.start_live() {
        warn!("no push channel, relying on status polling");
    }
    link.load_configuration().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("interrupted");

    Ok(())
}

async fn update(link: &Link, renderer: &ConsoleRenderer) -> Result<()> {
    link.start_update().await?;

    tokio::select! {
        _ = renderer.finished() => Ok(()),
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            warn!("stopped following the update, it continues on the device");
            Ok(())
        }
    }
}

async fn jog(link: &Link, command: &str, millis: u64) -> Result<()> {
    link.watchdog().begin(command);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
        res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
    }

    link.watchdog().end();

    // the STOP sent by the watchdog is not awaited, the runtime may end first
    link.send_command(Watchdog::STOP)
        .await
        .map(|reply| info!("device stopped: {}", reply.trim()))
}

async fn scan(link: &Link) -> Result<()> {
    let networks = link.scan_wifi().await?;

    if networks.is_empty() {
        info!("no networks found");
    }

    for network in networks {
        info!(
            "{:<32} {:>4} dBm {}",
            network.ssid,
            network.rssi,
            if network.secure { "secured" } else { "open" }
        );
    }

    Ok(())
}

async fn check_update(link: &Link) -> Result<()> {
    link.load_configuration().await;
    let availability = link.check_update().await;

    info!(
        "installed {}, published {}",
        availability.installed.as_deref().unwrap_or("unknown"),
        availability.remote_label()
    );

    if availability.update_available {
        info!("update available at {}", availability.download_url);
    }

    Ok(())
}
