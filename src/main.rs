// src/main.rs
// Application entry point: wires config, database, bus, agents, and the
// HTTP/SSE front door together, following the teacher's composition-root
// style in `backend/src/main.rs` / `mira-chat/src/main.rs`.

use std::str::FromStr;
use std::sync::Arc;

use maice_orchestrator::agents::answer::AnswerAgent;
use maice_orchestrator::agents::clarifier::ClarifierAgent;
use maice_orchestrator::agents::classifier::ClassifierAgent;
use maice_orchestrator::agents::observer::ObserverAgent;
use maice_orchestrator::api;
use maice_orchestrator::bus::MessageBus;
use maice_orchestrator::context::ContextAssembler;
use maice_orchestrator::llm::openai::OpenAiCompatProvider;
use maice_orchestrator::llm::LlmProvider;
use maice_orchestrator::prompt::{PromptBuilder, PromptLibrary};
use maice_orchestrator::repository::sqlite::SqliteSessionRepository;
use maice_orchestrator::repository::SessionRepository;
use maice_orchestrator::router::SessionRouter;
use maice_orchestrator::state::AppState;
use maice_orchestrator::CONFIG;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&CONFIG.logging.level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting maice-orchestrator");

    let connect_options = SqliteConnectOptions::from_str(&CONFIG.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(CONFIG.database.max_connections)
        .connect_with(connect_options)
        .await?;

    let sqlite_repo = SqliteSessionRepository::new(pool.clone());
    sqlite_repo.ensure_schema().await?;
    let repository: Arc<dyn SessionRepository> = Arc::new(sqlite_repo);

    let bus = Arc::new(MessageBus::new(CONFIG.bus.clone()));
    let prompts: Arc<dyn PromptBuilder> = Arc::new(PromptLibrary::new());
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
        CONFIG.provider.base_url.clone(),
        CONFIG.provider.api_key.clone(),
    ));

    let classifier = Arc::new(ClassifierAgent::new(
        bus.clone(),
        llm.clone(),
        prompts.clone(),
        CONFIG.agents.classifier.clone(),
        CONFIG.security.clone(),
    ));
    let clarifier = Arc::new(ClarifierAgent::new(
        bus.clone(),
        repository.clone(),
        llm.clone(),
        prompts.clone(),
        CONFIG.agents.clarifier.clone(),
        CONFIG.security.clone(),
        CONFIG.clarification.clone(),
    ));
    let answer = Arc::new(AnswerAgent::new(
        bus.clone(),
        repository.clone(),
        llm.clone(),
        prompts.clone(),
        CONFIG.agents.answer.clone(),
        CONFIG.timeouts.clone(),
    ));
    let observer = Arc::new(ObserverAgent::new(
        bus.clone(),
        repository.clone(),
        llm.clone(),
        prompts.clone(),
        CONFIG.agents.observer.clone(),
        CONFIG.memory.clone(),
    ));

    tokio::spawn(observer.clone().run_incremental_listener());

    let context = Arc::new(ContextAssembler::new(repository.clone(), bus.clone(), CONFIG.memory.clone()));
    let router = Arc::new(SessionRouter::new(
        bus.clone(),
        repository.clone(),
        context,
        classifier,
        clarifier,
        answer,
        observer,
        CONFIG.timeouts.clone(),
    ));

    let state = AppState { router, db: pool };
    let app = api::http::create_router(state);

    let listener = tokio::net::TcpListener::bind(CONFIG.bind_address()).await?;
    info!("listening on {}", CONFIG.bind_address());
    axum::serve(listener, app).await?;

    Ok(())
}
