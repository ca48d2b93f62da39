//! seen-sync: per-user "seen" list storage behind a shared write pin.

mod config;
mod error;
mod handler;
mod request_id;
mod server;
mod store;

use config::SyncConfig;
use handler::SeenHandler;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("SEEN_SYNC_CONFIG").ok())
        .unwrap_or_else(|| "seen-sync.toml".to_string());

    let listen_override = args
        .iter()
        .position(|a| a == "--listen")
        .and_then(|i| args.get(i + 1).cloned());

    // Load configuration
    let mut config = SyncConfig::load(&config_path)?;

    // CLI overrides take precedence over TOML and env vars
    if let Some(addr) = listen_override {
        config.server.listen_address = addr;
    }

    // Build the tokio runtime first — tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = seen_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            store_backend = ?config.store.backend,
            data_dir = %config.store.data_dir.display(),
            otlp_export = tracing_guard.is_exporting(),
            "Starting seen-sync"
        );

        run(config).await
    })
}

async fn run(config: SyncConfig) -> anyhow::Result<()> {
    let store = store::open(&config.store).await?;

    let handler = SeenHandler::new(
        store,
        config.auth.pin.clone(),
        config.server.max_body_bytes,
    );

    let state = AppState { config, handler };

    server::run(state).await
}
