use tracing::{error, info};

use chanwarden::filter::ActiveSelector;
use chanwarden::{BanRegistry, Config, Database, FilterEngine, QueryContext};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = chanwarden::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        chanwarden::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    info!("chanwarden - post admission filter and ban engine");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!(path = %config.database.path, error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let ctx = QueryContext::with_timeout_ms(config.admission.query_timeout_ms);
    match BanRegistry::new(&db).count_ip_bans_in_effect(&ctx).await {
        Ok(count) => info!(count, "IP bans in effect"),
        Err(e) => error!(error = %e, "failed to count IP bans"),
    }
    match FilterEngine::new(&db)
        .list_filters(&ctx, ActiveSelector::Active, None)
        .await
    {
        Ok(filters) => info!(count = filters.len(), "active filters loaded"),
        Err(e) => error!(error = %e, "failed to load filters"),
    }

    db.close().await;
}
