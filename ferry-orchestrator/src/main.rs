use anyhow::Context;
use ferry_adapters::{
    HttpArtifactRegistry, HttpDeploymentService, HttpInferenceService, HttpTrainingService,
    HttpTransport,
};
use ferry_orchestrator::config::{Config, ServiceEndpoints};
use ferry_orchestrator::repository::{JobStateStore, MemoryStore, PostgresStore};
use ferry_orchestrator::service::Orchestrator;
use ferry_orchestrator::stage::Adapters;
use ferry_orchestrator::{api, db};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_orchestrator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ferry Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store = open_store(&config).await?;
    let adapters = build_adapters(&config.services)?;
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        adapters,
        config.orchestrator.clone(),
    ));

    // Pick up runs a previous process left unfinished
    let resumed = orchestrator
        .resume_incomplete()
        .await
        .context("Failed to resume unfinished runs")?;
    if !resumed.is_empty() {
        tracing::info!("Resuming {} unfinished run(s)", resumed.len());
    }

    let app = api::create_router(orchestrator);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn JobStateStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, runs will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;
    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PostgresStore::new(pool)))
}

fn build_adapters(services: &ServiceEndpoints) -> anyhow::Result<Adapters> {
    let transport = |base_url: &str| -> anyhow::Result<HttpTransport> {
        let http = HttpTransport::new(base_url)
            .with_context(|| format!("Invalid service URL: {}", base_url))?;
        Ok(match &services.access_token {
            Some(token) => http.with_access_token(token.clone()),
            None => http,
        })
    };

    Ok(Adapters {
        training: Arc::new(HttpTrainingService::new(transport(&services.training_url)?)),
        registry: Arc::new(HttpArtifactRegistry::new(transport(&services.registry_url)?)),
        deployment: Arc::new(HttpDeploymentService::new(transport(
            &services.deployment_url,
        )?)),
        inference: Arc::new(HttpInferenceService::new(transport(&services.inference_url)?)),
    })
}
