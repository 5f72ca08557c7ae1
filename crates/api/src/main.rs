use std::sync::Arc;

use anyhow::Context;

use fieldstock_api::app::{build_app, services};
use fieldstock_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    let settings = Settings::load().context("failed to load configuration")?;
    fieldstock_observability::init(settings.log.format);

    let services = Arc::new(services::build_services(&settings).await?);
    let app = build_app(services);

    let addr = settings.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        environment = %settings.environment,
        "listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
