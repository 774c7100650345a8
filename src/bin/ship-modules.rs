use anyhow::Result;
use clap::Parser;
use ship_modules::cli::{ModulesCliImpl, ShipModulesCli};
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ShipModulesCli::parse();

    let level = match cli.verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting ship-modules v{}", env!("CARGO_PKG_VERSION"));

    let app = ModulesCliImpl::new(&cli)?;

    let cancel = app.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping running modules");
            cancel.cancel();
        }
    });

    match app.execute(&cli.command).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ {e:#}");
            std::process::exit(1);
        }
    }
}
