use bloodwork_infra::config::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bloodwork_observability::init();

    let config = PipelineConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let app = bloodwork_api::app::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
