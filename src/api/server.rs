use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    bot::BotSessionManager,
    directory::Directory,
    error::EngineError,
    identity::Identity,
    registry::Registry,
    store::Store,
    stream::MessageStream,
};

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct ApiState {
    pub store: Store,
    pub identity: Arc<Identity>,
    pub registry: Arc<Registry>,
    pub stream: MessageStream,
    pub bot: Option<Arc<BotSessionManager>>,
    /// Session-scoped directory cache: loaded once on sign-in, read-only
    /// until sign-out drops it.
    pub directory: tokio::sync::RwLock<Option<Arc<Directory>>>,
}

impl ApiState {
    /// Explicit user id wins; otherwise fall back to the signed-in session.
    fn resolve_user(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(|s| s.to_string())
            .or_else(|| self.identity.current_user_id())
    }
}

// -----------------------------------------------------------------------------
// Error mapping
// -----------------------------------------------------------------------------

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::AuthRequired => StatusCode::UNAUTHORIZED,
            EngineError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::BotUpstreamFailed(_) => StatusCode::BAD_GATEWAY,
            EngineError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(state: ApiState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/session",
                get(get_session).post(post_session).delete(delete_session),
            )
            .route("/users", post(register_user))
            .route("/users/search", get(search_users))
            .route("/directory", get(get_directory))
            .route("/conversations", get(list_conversations).post(create_conversation))
            .route("/conversations/:id/events", get(conversation_events))
            .route("/messages", post(send_message))
            .route("/bot/send", post(bot_send))
            .route("/bot/state", get(bot_state))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SignInBody {
    user_id: String,
}

async fn get_session(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse, ApiError> {
    let user = state.identity.require_user()?;
    Ok(Json(user))
}

async fn post_session(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SignInBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store
        .get_user(&body.user_id)
        .await?
        .ok_or_else(|| EngineError::ValidationFailed(format!("unknown user: {}", body.user_id)))?;
    state.identity.sign_in(user.clone());

    // The directory is loaded once per authenticated session.
    let directory = Directory::load(&state.store).await?;
    *state.directory.write().await = Some(Arc::new(directory));

    Ok(Json(user))
}

async fn delete_session(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.identity.sign_out();
    *state.directory.write().await = None;
    StatusCode::NO_CONTENT
}

async fn get_directory(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, ApiError> {
    let directory = state
        .directory
        .read()
        .await
        .clone()
        .ok_or(EngineError::AuthRequired)?;
    Ok(Json(directory.entries().clone()))
}

// -----------------------------------------------------------------------------
// Registry operations
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterUserBody {
    display_name: String,
    #[serde(default)]
    email: String,
}

async fn register_user(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RegisterUserBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .registry
        .register_user(&body.display_name, &body.email)
        .await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_users(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.registry.search_users(&query.q).await?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

async fn list_conversations(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.resolve_user(query.user_id.as_deref());
    let conversations = state.registry.list_conversations(user_id.as_deref()).await?;
    Ok(Json(conversations))
}

#[derive(Debug, Deserialize)]
struct CreateConversationBody {
    user_id: Option<String>,
    other_user_id: String,
}

async fn create_conversation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateConversationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.resolve_user(body.user_id.as_deref());
    let conversation = state
        .registry
        .find_or_create_conversation(user_id.as_deref(), &body.other_user_id)
        .await?;
    Ok(Json(conversation))
}

// -----------------------------------------------------------------------------
// Message stream
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    conversation_id: String,
    sender_id: Option<String>,
    body: String,
}

async fn send_message(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = state
        .resolve_user(body.sender_id.as_deref())
        .ok_or(EngineError::AuthRequired)?;
    let message = state
        .stream
        .send(&body.conversation_id, &sender_id, &body.body)
        .await?;
    Ok(Json(message))
}

/// SSE feed of full transcript snapshots. When the client goes away the
/// stream is dropped and with it the subscription handle, releasing the
/// underlying live subscription.
async fn conversation_events(
    State(state): State<Arc<ApiState>>,
    Path(conversation_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::BoxError>>>, ApiError> {
    info!("SSE subscription opened for conversation {}", conversation_id);
    let mut subscription = state.stream.subscribe(&conversation_id).await?;

    let stream = async_stream::stream! {
        while let Some(snapshot) = subscription.recv().await {
            match serde_json::to_string(&snapshot) {
                Ok(payload) => yield Ok(Event::default().event("snapshot").data(payload)),
                Err(e) => {
                    yield Err(axum::BoxError::from(e));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// -----------------------------------------------------------------------------
// Bot
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BotSendBody {
    user_id: Option<String>,
    text: String,
}

async fn bot_send(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<BotSendBody>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state.bot.as_ref().ok_or_else(|| {
        EngineError::BotUpstreamFailed("reply service not configured".to_string())
    })?;
    let user_id = state.resolve_user(body.user_id.as_deref());
    let message = bot.send_to_bot(user_id.as_deref(), &body.text).await?;
    Ok(Json(message))
}

async fn bot_state(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let bot = state.bot.as_ref().ok_or_else(|| {
        EngineError::BotUpstreamFailed("reply service not configured".to_string())
    })?;
    let user_id = state
        .resolve_user(query.user_id.as_deref())
        .ok_or(EngineError::AuthRequired)?;
    Ok(Json(json!({ "state": bot.state(&user_id) })))
}
