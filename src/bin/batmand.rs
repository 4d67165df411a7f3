//! batmand - B.A.T.M.A.N. mesh routing daemon
//!
//! Loads a JSON configuration, binds the UDP transport on every configured
//! interface and runs the routing loop until Ctrl-C. Route mutations and
//! tunnel sessions are logged rather than applied to the kernel.

use anyhow::{Context, Result};
use batmand::api::{config_exists, default_config, load_config, save_config, DaemonBuilder};
use batmand::network::UdpTransport;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// B.A.T.M.A.N. mesh routing daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "batmand.json")]
    config: PathBuf,

    /// Debug level: 0 warn, 1 info, 2 debug, 3 debug with originator dumps, 4 trace
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=4))]
    debug: u8,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    dry_run: bool,

    /// Write a default configuration to the config path if none exists, then exit
    #[arg(long)]
    init: bool,
}

fn env_filter(debug: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directive = match debug {
        0 => "batmand=warn",
        1 => "batmand=info",
        2 => "batmand=debug,batmand::routing::state=info",
        3 => "batmand=debug",
        _ => "batmand=trace",
    };
    EnvFilter::new(directive)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(args.debug))
        .with_target(args.debug >= 3)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if args.init && !config_exists(&args.config) {
        save_config(&args.config, &default_config())
            .with_context(|| format!("Failed to write {}", args.config.display()))?;
        println!(
            "Wrote {}; add at least one interface and start again.",
            args.config.display()
        );
        return Ok(());
    }

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.dry_run {
        let rendered =
            serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
        println!("{}", rendered);
        return Ok(());
    }

    let transport = UdpTransport::bind(&config.batman_interfaces(), config.port)
        .await
        .context("Failed to bind UDP transport")?;
    let mut daemon = DaemonBuilder::new(config)
        .build(transport)
        .context("Failed to create daemon")?;

    let handle = daemon.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, stopping"),
        }
        handle.request_shutdown();
    });

    daemon.run().await.context("Daemon failed")?;
    info!("stopped");
    Ok(())
}
