use backend::{api, config::AppConfig, runtime::Runtime};
use common::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("dispatch-backend", is_production);

    tracing::info!("Starting dispatch backend...");

    let cfg = AppConfig::from_env();
    let runtime = Runtime::initialize(cfg).await?;
    runtime.start_workers();

    let addr = runtime.cfg.bind_addr.clone();
    tracing::info!(addr = %addr, "backend started; serving until shutdown signal");

    api::serve(runtime, &addr).await
}
