//! digistore - storefront server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌─────────────┐    ┌──────────┐
//! │ Gateway  │───▶│  Orders  │───▶│ Settlement  │───▶│  Wallet  │
//! │  (axum)  │    │ Payments │    │(exactly-once│    │ Catalog  │
//! └──────────┘    └──────────┘    └─────────────┘    └──────────┘
//!                                        ▲
//!                      RecoveryWorker ───┤
//!                      ExpirySweeper  ───┘
//! ```
//!
//! Usage: `digistore [--env dev] [--port 8080]`

use anyhow::Context;

use digistore::app::App;
use digistore::config::AppConfig;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config =
        AppConfig::load(&env).with_context(|| format!("loading config for env `{env}`"))?;
    let _log_guard = digistore::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "Starting digistore"
    );

    let app = App::build(&app_config)
        .await
        .context("wiring services")?;

    let App {
        recovery,
        sweeper,
        state,
        ..
    } = app;
    tokio::spawn(async move { recovery.run().await });
    tokio::spawn(async move { sweeper.run().await });
    tracing::info!("Recovery worker and expiry sweeper started");

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    digistore::gateway::run_server(&app_config.gateway.host, port, state)
        .await
        .context("gateway server")?;
    Ok(())
}
