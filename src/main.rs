use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_ofp_l2::bootstrap::SwitchBootstrapper;
use rust_ofp_l2::config::Config;
use rust_ofp_l2::directory::HttpDirectory;
use rust_ofp_l2::learning_switch::LearningSwitch;
use rust_ofp_l2::ofp_controller::Controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let directory = HttpDirectory::new(config.directory_url.clone(), config.directory_timeout())
        .context("failed to build directory client")?;
    info!(url = %directory.base_url(), timeout = ?config.directory_timeout(), "Using host directory");

    let mut controller = Controller::new();
    controller.subscribe_switch_up(Arc::new(SwitchBootstrapper));
    controller.register_handler(config.handler_priority, Arc::new(LearningSwitch::new(Arc::new(directory))));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    tokio::select! {
        res = Arc::new(controller).run(listener) => res.context("controller stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
