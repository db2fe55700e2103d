use std::{process, sync::Arc};

use clap::Parser;
use log::{debug, info};
use wsnotes::{App, Cli, Config, ConsoleNotifier, LogNotifier, Notifier, Result};

pub fn initialize_logger(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    debug!("Logger initialized");
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    config.apply_env()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    info!("Using {:?} backend", config.backend);

    // styled banners on a terminal, log records otherwise
    let notifier: Arc<dyn Notifier> = if console::user_attended_stderr() {
        Arc::new(ConsoleNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let app = App::from_config(config, config_path, notifier, cli.verbose)?;
    app.run(cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
