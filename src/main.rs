use std::sync::Arc;

use anyhow::Context;

use shelter_outreach::api;
use shelter_outreach::config::OutreachConfig;
use shelter_outreach::orchestrator::Orchestrator;
use shelter_outreach::store::{Database, LibSqlBackend, PersistenceSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OutreachConfig::from_env();
    let port = config.port;

    eprintln!("📞 Shelter Outreach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/call-jobs", port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws", port);
    eprintln!(
        "   Live telephony: {}",
        if config.twilio.is_some() { "twilio" } else { "disabled (dry-run only)" }
    );
    eprintln!(
        "   Scripting: {}",
        config.llm.as_ref().map_or("fallback templates", |llm| llm.model.as_str())
    );
    if config.public_base_url.is_none() {
        tracing::warn!("OUTREACH_PUBLIC_BASE_URL not set; provider callbacks are disabled");
    }

    let mut orchestrator = Orchestrator::new(config.clone());

    if config.persistence_enabled {
        let db: Arc<dyn Database> = Arc::new(
            LibSqlBackend::new_local(&config.db_path)
                .await
                .with_context(|| format!("opening database at {}", config.db_path.display()))?,
        );
        let restored = orchestrator
            .rehydrate(db.as_ref())
            .await
            .context("rehydrating state from database")?;
        eprintln!(
            "   Restored {} jobs, {} transfers, {} escalations from {}",
            restored.jobs,
            restored.transfers,
            restored.escalations,
            config.db_path.display()
        );
        orchestrator = orchestrator.with_persistence(PersistenceSink::new(db));
    } else {
        eprintln!("   Persistence: disabled");
    }

    let app = api::routes(Arc::new(orchestrator));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    tracing::info!(port, "Outreach server started");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
