use std::{net::SocketAddr, sync::Arc};

use llm_core::{LlmClient, RoleBook};
use tokio::net::TcpListener;
use tracing::info;

use voice_gateway::{
    auth::KeyRegistry, build_router, metrics::GatewayMetrics, AppState, Pipeline, ServerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice gateway...");

    let config = ServerConfig::from_env();

    let roles = RoleBook::load_or_builtin(&config.roles_path);
    info!("Loaded {} roles", roles.roles().len());
    let generation = Arc::new(LlmClient::new(config.llm.clone(), roles)?);
    info!(
        "LLM provider {:?}, model {} at {}",
        config.llm.provider, config.llm.model, config.llm.base_url
    );

    let synthesis = tts_core::create_backend(config.tts_provider, &config.tts)?;
    info!("TTS provider: {}", config.tts_provider);

    let recognition = match config.stt_provider {
        Some(provider) => {
            info!("STT provider: {provider}");
            Some(stt_core::create_backend(provider, &config.stt)?)
        }
        None => {
            info!("STT_PROVIDER not set, speech input disabled");
            None
        }
    };

    let auth = Arc::new(KeyRegistry::load(&config.auth_keys_path));

    let pipeline = Arc::new(Pipeline {
        auth,
        generation,
        synthesis,
        recognition,
        config: config.pipeline.clone(),
        metrics: Arc::new(GatewayMetrics::new()),
    });
    info!(
        "Pipeline: unit={}B mode={:?} llm_timeout={:?} tts_timeout={:?}",
        config.pipeline.unit_bytes,
        config.pipeline.delivery_mode,
        config.pipeline.llm_timeout,
        config.pipeline.tts_timeout
    );

    let app = build_router(AppState::new(pipeline), &config)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Gateway listening on ws://{addr}/ws");
    axum::serve(listener, app).await?;
    Ok(())
}
