mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use browser::WebDriverFactory;
use relevance::{Embedder, OllamaEmbedder, OpenAiEmbedder, RelevanceScorer};
use search::{
    JobSearchPipeline, PipelineError, ResponseMode, SearchResponse, SourceCoordinator,
};
use serde::{Deserialize, Serialize};
use sources::{
    GlassdoorExtractor, GlassdoorLocations, JobSource, LinkedInExtractor, RetryPolicy,
    SearchCriteria, SourceExtractor,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, EmbeddingBackend};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<JobSearchPipeline>,
    metrics: Arc<Metrics>,
    webdriver: Option<WebDriverFactory>,
}

#[derive(Deserialize)]
struct SearchParams {
    mode: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    webdriver: String,
    embedder: String,
    default_mode: ResponseMode,
    sources: Vec<JobSource>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::UnknownMode(_) => StatusCode::BAD_REQUEST,
            PipelineError::ScorerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    init_tracing();
    info!(mode = ?config.search.mode, "Starting job search API");

    // Browser sessions are opened per source per request
    let webdriver = WebDriverFactory::new(config.webdriver.clone());
    if !webdriver.is_ready().await {
        warn!(
            url = %config.webdriver.webdriver_url,
            "WebDriver is not reachable yet, searches will fail until it is"
        );
    }

    let pipeline = build_pipeline(&config, webdriver.clone())?;

    let state = AppState {
        pipeline: Arc::new(pipeline),
        metrics: Metrics::new(),
        webdriver: Some(webdriver),
    };

    let app = build_router(state);

    // Start server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,api=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_pipeline(config: &AppConfig, webdriver: WebDriverFactory) -> Result<JobSearchPipeline> {
    let retry = RetryPolicy::new(
        config.retry.max_retries,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
    );
    let locations = GlassdoorLocations::new(
        sources::glassdoor::BASE_URL.to_string(),
        &config.webdriver.user_agent,
        retry,
    )?;

    let extractors: Vec<Arc<dyn SourceExtractor>> = vec![
        Arc::new(LinkedInExtractor::new(
            webdriver.clone(),
            config.timeouts.linkedin.clone(),
        )),
        Arc::new(GlassdoorExtractor::new(
            webdriver,
            Arc::new(locations),
            config.timeouts.glassdoor.clone(),
        )),
    ];

    let coordinator = SourceCoordinator::new(extractors)
        .with_deadline(config.search.source_deadline_secs.map(Duration::from_secs))
        .with_dedup(config.search.dedup);

    let mut pipeline = JobSearchPipeline::new(coordinator).with_default_mode(config.search.mode);

    match build_embedder(&config.relevance.backend)? {
        Some(embedder) => {
            let scorer = RelevanceScorer::new(embedder)
                .with_threshold(config.relevance.threshold)
                .with_concurrency(config.relevance.concurrency);
            info!(
                backend = scorer.embedder().name(),
                threshold = scorer.threshold(),
                "Relevance scoring enabled"
            );
            pipeline = pipeline.with_scorer(scorer);
        }
        None => {
            anyhow::ensure!(
                config.search.mode == ResponseMode::All,
                "SEARCH_MODE=relevant needs an embedding backend"
            );
            info!("Relevance scoring disabled");
        }
    }

    Ok(pipeline)
}

fn build_embedder(backend: &EmbeddingBackend) -> Result<Option<Arc<dyn Embedder>>> {
    let embedder: Arc<dyn Embedder> = match backend {
        EmbeddingBackend::Disabled => return Ok(None),
        EmbeddingBackend::Ollama {
            base_url,
            model,
            timeout_secs,
        } => Arc::new(OllamaEmbedder::new(
            base_url.clone(),
            model.clone(),
            Duration::from_secs(*timeout_secs),
        )?),
        EmbeddingBackend::OpenAi {
            base_url,
            model,
            api_key,
            dimensions,
            timeout_secs,
        } => Arc::new(OpenAiEmbedder::new(
            api_key,
            base_url,
            model.clone(),
            *dimensions,
            Duration::from_secs(*timeout_secs),
            3,
        )?),
    };
    Ok(Some(embedder))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/search_jobs", post(search_jobs))
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn search_jobs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    Json(criteria): Json<SearchCriteria>,
) -> Result<Json<SearchResponse>, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("search", %request_id, position = %criteria.position);

    async move {
        let timer = TimedOperation::start();

        let outcome = match params.mode.as_deref().map(str::parse::<ResponseMode>) {
            Some(Err(e)) => Err(e),
            Some(Ok(mode)) => state.pipeline.search(&criteria, Some(mode)).await,
            None => state.pipeline.search(&criteria, None).await,
        };

        match outcome {
            Ok(response) => {
                state.metrics.record_request(true);
                state.metrics.record_search(timer.elapsed(), &response);
                Ok(Json(response))
            }
            Err(e) => {
                state.metrics.record_request(false);
                warn!(error = %e, "Search rejected");
                Err(ApiError::from(e))
            }
        }
    }
    .instrument(span)
    .await
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let webdriver = match &state.webdriver {
        Some(factory) => {
            if factory.is_ready().await {
                "ok".to_string()
            } else {
                "error: not ready".to_string()
            }
        }
        None => "not configured".to_string(),
    };

    let embedder = match state.pipeline.scorer() {
        Some(scorer) => match scorer.embedder().ping().await {
            Ok(()) => format!("ok ({})", scorer.embedder().name()),
            Err(e) => format!("error: {}", e),
        },
        None => "disabled".to_string(),
    };

    Json(HealthResponse {
        webdriver,
        embedder,
        default_mode: state.pipeline.default_mode(),
        sources: state.pipeline.coordinator().sources(),
    })
}

async fn get_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
