mod config;
mod pages;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use polls_api::{
    AddChoiceRequest, CreateQuestionRequest, IndexPage, MigrateResult, PollsApi, QuestionDetail,
    ResultsPage, VoteRequest, API_CONTRACT_VERSION,
};
use polls_core::{Choice, ChoiceId, PollsError, QuestionId};
use polls_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Args;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

/// Source of "now" for every visibility decision made by a request.
#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(OffsetDateTime),
}

impl Clock {
    fn now(self) -> OffsetDateTime {
        match self {
            Self::System => OffsetDateTime::now_utc(),
            Self::Fixed(at) => at,
        }
    }
}

#[derive(Debug, Clone)]
struct ServiceState {
    api: PollsApi,
    index_limit: usize,
    clock: Clock,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

/// Same failure as [`ServiceError`], rendered as an HTML page.
#[derive(Debug)]
struct PageError(ServiceError);

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Raw vote form. `choice` stays text so an empty or mangled value is treated
/// like no selection instead of failing extraction.
#[derive(Debug, Clone, Deserialize)]
struct VoteForm {
    choice: Option<String>,
}

impl VoteForm {
    fn selected_choice(&self) -> Option<ChoiceId> {
        self.choice.as_deref().and_then(|raw| raw.trim().parse().ok()).map(ChoiceId)
    }
}

#[derive(Debug, Clone, Serialize)]
struct DeleteResult {
    question_id: QuestionId,
    deleted: bool,
}

enum VoteOutcome {
    Counted,
    Rejected { detail: QuestionDetail, message: String },
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<PollsError>() {
            Some(PollsError::NotFound(id)) => {
                debug!(question_id = %id, "question hidden or missing");
                StatusCode::NOT_FOUND
            }
            Some(PollsError::Validation(_) | PollsError::NoChoiceSelected) => {
                StatusCode::BAD_REQUEST
            }
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, format!("{err:#}"))
    }
}

impl From<PollsError> for ServiceError {
    fn from(err: PollsError) -> Self {
        Self::from(anyhow::Error::new(err))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.error, "request failed");
        }
        (self.status, Json(self)).into_response()
    }
}

impl From<ServiceError> for PageError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let Self(err) = self;
        if err.status.is_server_error() {
            error!(status = %err.status, error = %err.error, "page request failed");
        }
        let message = if err.status == StatusCode::NOT_FOUND {
            "No poll matches the given query."
        } else {
            err.error.as_str()
        };
        (err.status, Html(pages::error(err.status, message))).into_response()
    }
}

impl ServiceState {
    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Runs a facade call on the blocking pool; the facade does synchronous SQLite I/O.
    async fn run<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&PollsApi) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let api = self.api.clone();
        tokio::task::spawn_blocking(move || call(&api))
            .await
            .map_err(|err| {
                ServiceError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("blocking task failed: {err}"),
                )
            })?
            .map_err(ServiceError::from)
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/polls/", get(index_page))
        .route("/polls/:question_id/", get(detail_page))
        .route("/polls/:question_id/results/", get(results_page))
        .route("/polls/:question_id/vote/", post(vote_form))
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/questions", get(question_index).post(question_create))
        .route("/v1/questions/:question_id", get(question_show).delete(question_delete))
        .route("/v1/questions/:question_id/results", get(question_results))
        .route("/v1/questions/:question_id/choices", post(choice_add))
        .route("/v1/questions/:question_id/vote", post(question_vote))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_filter)
        .with_context(|| format!("invalid log filter: {}", args.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let api = PollsApi::new(args.db.clone());
    let migrated = api.migrate(false).context("failed to migrate database at startup")?;
    info!(
        db = %args.db.display(),
        from_version = migrated.current_version,
        to_version = ?migrated.after_version,
        "database ready"
    );

    let clock = match args.as_of {
        Some(at) => {
            warn!(as_of = %at, "serving with a fixed clock");
            Clock::Fixed(at)
        }
        None => Clock::System,
    };
    let state = ServiceState { api, index_limit: args.index_limit, clock };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "polls service listening");
    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;
    info!("polls service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(err) => {
                warn!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received SIGTERM, shutting down");
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn index_page(State(state): State<ServiceState>) -> Result<Html<String>, PageError> {
    let (now, limit) = (state.now(), state.index_limit);
    let page = state.run(move |api| api.index(now, limit)).await?;
    Ok(Html(pages::index(&page)))
}

async fn detail_page(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
) -> Result<Html<String>, PageError> {
    let now = state.now();
    let detail = state.run(move |api| api.detail(QuestionId(question_id), now)).await?;
    Ok(Html(pages::detail(&detail, None)))
}

async fn results_page(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
) -> Result<Html<String>, PageError> {
    let now = state.now();
    let page = state.run(move |api| api.results(QuestionId(question_id), now)).await?;
    Ok(Html(pages::results(&page)))
}

async fn vote_form(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
    Form(form): Form<VoteForm>,
) -> Result<Response, PageError> {
    let id = QuestionId(question_id);
    let now = state.now();
    let request = VoteRequest { choice: form.selected_choice() };
    let outcome = state
        .run(move |api| match api.vote(id, &request, now) {
            Ok(_) => Ok(VoteOutcome::Counted),
            Err(err)
                if matches!(err.downcast_ref::<PollsError>(), Some(PollsError::NoChoiceSelected)) =>
            {
                Ok(VoteOutcome::Rejected { detail: api.detail(id, now)?, message: err.to_string() })
            }
            Err(err) => Err(err),
        })
        .await?;

    match outcome {
        VoteOutcome::Counted => {
            info!(question_id = %id, "vote recorded");
            Ok(Redirect::to(&format!("/polls/{id}/results/")).into_response())
        }
        VoteOutcome::Rejected { detail, message } => {
            debug!(question_id = %id, "vote rejected, no choice selected");
            Ok(Html(pages::detail(&detail, Some(&message))).into_response())
        }
    }
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.run(PollsApi::schema_status).await?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.run(move |api| api.migrate(request.dry_run)).await?;
    if !result.dry_run {
        info!(after_version = ?result.after_version, "migration applied");
    }
    Ok(Json(envelope(result)))
}

async fn question_index(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<IndexPage>>, ServiceError> {
    let (now, limit) = (state.now(), state.index_limit);
    let page = state.run(move |api| api.index(now, limit)).await?;
    Ok(Json(envelope(page)))
}

async fn question_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateQuestionRequest>,
) -> Result<Json<ServiceEnvelope<QuestionDetail>>, ServiceError> {
    let detail = state.run(move |api| api.create_question(&request)).await?;
    info!(
        question_id = %detail.question.id,
        choices = detail.choices.len(),
        "question created"
    );
    Ok(Json(envelope(detail)))
}

async fn question_show(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<QuestionDetail>>, ServiceError> {
    let now = state.now();
    let detail = state.run(move |api| api.detail(QuestionId(question_id), now)).await?;
    Ok(Json(envelope(detail)))
}

async fn question_delete(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<DeleteResult>>, ServiceError> {
    let id = QuestionId(question_id);
    let deleted = state.run(move |api| api.delete_question(id)).await?;
    if !deleted {
        return Err(PollsError::NotFound(id).into());
    }
    info!(question_id = %id, "question deleted");
    Ok(Json(envelope(DeleteResult { question_id: id, deleted })))
}

async fn question_results(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<ResultsPage>>, ServiceError> {
    let now = state.now();
    let page = state.run(move |api| api.results(QuestionId(question_id), now)).await?;
    Ok(Json(envelope(page)))
}

async fn choice_add(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
    Json(request): Json<AddChoiceRequest>,
) -> Result<Json<ServiceEnvelope<Choice>>, ServiceError> {
    let choice = state.run(move |api| api.add_choice(QuestionId(question_id), &request)).await?;
    info!(question_id, choice_id = %choice.id, "choice added");
    Ok(Json(envelope(choice)))
}

async fn question_vote(
    State(state): State<ServiceState>,
    Path(question_id): Path<i64>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<ServiceEnvelope<ResultsPage>>, ServiceError> {
    let now = state.now();
    let page = state.run(move |api| api.vote(QuestionId(question_id), &request, now)).await?;
    info!(question_id, total_votes = page.total_votes, "vote recorded");
    Ok(Json(envelope(page)))
}
