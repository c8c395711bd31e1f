use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hookmirror_core::PartitionLock;
use hookmirror_server::config::Config;
use hookmirror_server::github::GitHubApp;
use hookmirror_server::push::{PushRunner, DEFAULT_PUSH_SCRIPT};
use hookmirror_server::{build_router, AppState, Bridge, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting hookmirror {}", hookmirror_core::version());

    let registry = Arc::new(Registry::load(&config.registry_path).await?);

    let bridge = match &config.github_app {
        Some(app) => {
            let github = GitHubApp::new(app.app_id, &app.private_key, app.api_url.clone())?;
            info!("CI bridge enabled for GitHub App {}", app.app_id);
            Some(Arc::new(Bridge::new(Arc::new(github), registry.clone())))
        }
        None => {
            warn!("GITHUB_APP_ID not set, CI bridge disabled");
            None
        }
    };

    let script = match &config.push_script_path {
        Some(path) => {
            info!("Using push script from {}", path.display());
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read push script {}", path.display()))?
        }
        None => DEFAULT_PUSH_SCRIPT.to_string(),
    };

    if config.admin_secret.is_none() {
        warn!("ADMIN_SECRET not set, admin API and /status disabled");
    }

    let state = Arc::new(AppState {
        registry,
        bridge,
        push_runner: PushRunner::new(
            config.shell_command.clone(),
            config.shell_args.clone(),
            config.data_dir.clone(),
            script,
        ),
        push_locks: PartitionLock::new(),
        admin_secret: config.admin_secret.clone(),
    });

    let app = build_router(state);

    let addr = SocketAddr::new(config.listen_address, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
