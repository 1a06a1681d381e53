mod api;
mod config;
mod core;
mod error;
mod logger;
mod models;
mod modules;
mod services;
mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::modules::agent_reaper::{self, ReaperSettings};
use crate::services::agent::OpenAiAgentFactory;
use crate::services::agent_controller::AgentController;
use crate::services::agent_registry::AgentRegistry;
use crate::services::assistant::OpenAiAssistantClient;
use crate::services::chat_client::StreamChatClient;
use crate::services::web_search::TavilySearch;
use crate::services::RelayClients;
use crate::utils::event_bus::EventBus;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::init_global() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logger::init_logger(cfg) {
        eprintln!("Failed to init logger: {err}");
        std::process::exit(1);
    }

    cfg.print();

    if let Err(err) = run(cfg).await {
        error!("Server error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: &'static Config) -> anyhow::Result<()> {
    if cfg.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set, agents will fail to initialize");
    }

    let chat = Arc::new(
        StreamChatClient::new(&cfg.stream_api_key, &cfg.stream_api_secret, &cfg.stream_base_url)
            .context("failed to create chat client")?,
    );
    let clients = RelayClients {
        chat: chat.clone(),
        assistant: Arc::new(OpenAiAssistantClient::new(
            cfg.openai_api_key.clone(),
            cfg.openai_base_url.clone(),
        )),
        search: Arc::new(TavilySearch::new(
            cfg.tavily_api_key.clone(),
            cfg.tavily_base_url.clone(),
        )),
        events: EventBus::default(),
    };

    let factory = Arc::new(OpenAiAgentFactory::new(
        clients.clone(),
        cfg.openai_model.clone(),
    ));
    let controller = AgentController::new(AgentRegistry::new(), chat.clone(), factory);
    let reaper_shutdown = CancellationToken::new();
    let reaper = agent_reaper::start_background(
        controller.clone(),
        ReaperSettings::from_config(cfg),
        reaper_shutdown.clone(),
    );

    let state = api::AppState {
        controller: controller.clone(),
        chat,
        events: clients.events.clone(),
        webhook_secret: Arc::from(cfg.stream_api_secret.as_str()),
    };
    let app = api::router(state, &cfg.cors_origins);

    let host = cfg
        .host
        .parse()
        .with_context(|| format!("invalid HOST {}", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper_shutdown.cancel();
    if let Err(err) = reaper.await {
        warn!("agent reaper did not stop cleanly: {}", err);
    }
    controller.dispose_all().await;
    served.context("server terminated unexpectedly")
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
