use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keepsake_store::Database;

use keepsake_server::api::{self, AppState};
use keepsake_server::auth::TokenVerifier;
use keepsake_server::config::ServerConfig;
use keepsake_server::controller::CapsuleController;
use keepsake_server::media::MediaStore;
use keepsake_server::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keepsake_server=debug")),
        )
        .init();

    info!("Starting Keepsake server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        db_path = %config.db_path.display(),
        media_path = %config.media_storage_path.display(),
        "Loaded configuration"
    );

    if config.auth_pubkey == [0u8; 32] {
        tracing::warn!("AUTH_PUBKEY not configured; every bearer token will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Capsule store (runs migrations on open)
    let db = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    // Media store (creates directory if missing)
    let media = Arc::new(
        MediaStore::new(
            config.media_storage_path.clone(),
            &config.public_base_url,
            config.max_upload_size,
        )
        .await?,
    );

    // Bearer-token verifier with the identity provider's public key
    let verifier = TokenVerifier::new(config.auth_pubkey);

    // Rate limiter: 10 req/s sustained per caller, burst of 30
    let rate_limiter = RateLimiter::default();

    let controller = Arc::new(CapsuleController::new(db, media.clone()));

    let app_state = AppState {
        controller,
        media,
        verifier: verifier.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background maintenance tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Periodic token cache cleanup (every 10 minutes)
    let tv = verifier.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            tv.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
