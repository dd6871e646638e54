use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use swesh_core::constants::MESSAGE_PAGE_SIZE;
use swesh_core::{user_room, InteractionAction, MatchStatus};
use swesh_store::{
    group_by_counterpart, Archival, Cancellation, ConfirmOutcome, Item, ItemDeletionReport, Match,
    MatchFormation, MatchGroup, MatchSummary, Message, NewItem, User,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notifier::RealtimeHub;
use crate::rate_limit::{rate_limit_middleware, RequestLimiter};
use crate::swap::{ProposalOutcome, SwapService};

#[derive(Clone)]
pub struct AppState {
    pub swap: Arc<SwapService>,
    pub hub: Arc<RealtimeHub>,
    pub rate_limiter: RequestLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/items", post(create_item).get(list_items))
        .route("/items/{id}", get(get_item).delete(delete_item))
        .route("/interactions", post(record_interaction))
        .route("/proposals", post(submit_proposal))
        .route("/matches", get(list_matches))
        .route("/matches/{id}/confirm", post(confirm_exchange))
        .route("/matches/{id}/cancel", post(cancel_match))
        .route("/chat/{match_id}/messages", get(list_messages).post(send_message))
        .route("/chat/{match_id}/typing", post(typing))
        .route("/events/user", get(user_events))
        .route("/events/chat/{match_id}", get(chat_events))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The acting user, as placed in `x-user-id` by the auth gateway.
fn acting_user(headers: &HeaderMap) -> Result<Uuid, ServerError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Unauthorized("missing x-user-id header".into()))?;

    Uuid::parse_str(raw)
        .map_err(|_| ServerError::Unauthorized("malformed x-user-id header".into()))
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    instance: String,
    version: &'static str,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    nickname: String,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct ItemsQuery {
    #[serde(default)]
    feed: bool,
}

#[derive(Deserialize)]
struct InteractionRequest {
    item_id: Uuid,
    action: InteractionAction,
}

#[derive(Serialize)]
struct InteractionResponse {
    action: InteractionAction,
    #[serde(rename = "match")]
    match_formed: Option<MatchFormation>,
}

#[derive(Deserialize)]
struct ProposalRequest {
    target_item_id: Uuid,
    offered_item_id: Uuid,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ProposalResponse {
    Pending { proposal_id: Uuid },
    Matched { match_id: Uuid, chat_id: Uuid },
}

#[derive(Deserialize)]
struct MatchesQuery {
    #[serde(default)]
    group_by_user: bool,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MatchesResponse {
    Flat(Vec<MatchSummary>),
    Grouped(Vec<MatchGroup>),
}

#[derive(Deserialize, Default)]
struct CancelRequest {
    reason: Option<String>,
}

#[derive(Serialize)]
struct MessagesResponse {
    match_id: Uuid,
    status: MatchStatus,
    cancellation: Option<Cancellation>,
    archival: Option<Archival>,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ServerError> {
    let nickname = req.nickname.trim();
    if nickname.is_empty() {
        return Err(ServerError::BadRequest("nickname must not be empty".into()));
    }

    let user = state
        .swap
        .create_user(nickname, req.avatar.as_deref())
        .await?;

    info!(user = %user.id, "user registered");
    Ok(Json(user))
}

async fn get_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ServerError> {
    acting_user(&headers)?;
    Ok(Json(state.swap.get_user(id).await?))
}

async fn create_item(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(new): Json<NewItem>,
) -> Result<Json<Item>, ServerError> {
    let owner = acting_user(&headers)?;
    if new.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".into()));
    }

    let item = state.swap.create_item(owner, new).await?;

    info!(item = %item.id, owner = %owner, "item listed");
    Ok(Json(item))
}

async fn list_items(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> Result<Json<Vec<Item>>, ServerError> {
    let user = acting_user(&headers)?;
    let items = if query.feed {
        state.swap.list_feed(user).await?
    } else {
        state.swap.list_user_items(user).await?
    };
    Ok(Json(items))
}

async fn get_item(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Item>, ServerError> {
    acting_user(&headers)?;
    Ok(Json(state.swap.get_item(id).await?))
}

async fn delete_item(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ItemDeletionReport>, ServerError> {
    let user = acting_user(&headers)?;
    Ok(Json(state.swap.delete_item(id, user).await?))
}

async fn record_interaction(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<InteractionRequest>,
) -> Result<Json<InteractionResponse>, ServerError> {
    let user = acting_user(&headers)?;
    let outcome = state
        .swap
        .record_interaction(user, req.item_id, req.action)
        .await?;

    Ok(Json(InteractionResponse {
        action: outcome.interaction.action,
        match_formed: outcome.match_formed,
    }))
}

async fn submit_proposal(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<ProposalRequest>,
) -> Result<Json<ProposalResponse>, ServerError> {
    let proposer = acting_user(&headers)?;
    let outcome = state
        .swap
        .submit_proposal(proposer, req.target_item_id, req.offered_item_id)
        .await?;

    Ok(Json(match outcome {
        ProposalOutcome::Pending(proposal) => ProposalResponse::Pending {
            proposal_id: proposal.id,
        },
        ProposalOutcome::Matched(formation) => ProposalResponse::Matched {
            match_id: formation.match_id,
            chat_id: formation.chat_id,
        },
    }))
}

async fn list_matches(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<MatchesResponse>, ServerError> {
    let user = acting_user(&headers)?;
    let summaries = state.swap.list_matches(user).await?;

    Ok(Json(if query.group_by_user {
        MatchesResponse::Grouped(group_by_counterpart(&summaries))
    } else {
        MatchesResponse::Flat(summaries)
    }))
}

async fn confirm_exchange(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConfirmOutcome>, ServerError> {
    let user = acting_user(&headers)?;
    Ok(Json(state.swap.confirm_exchange(id, user).await?))
}

async fn cancel_match(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Match>, ServerError> {
    let user = acting_user(&headers)?;
    let reason = body.as_ref().and_then(|b| b.reason.clone());
    Ok(Json(
        state.swap.cancel_match(id, user, reason.as_deref()).await?,
    ))
}

async fn list_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let user = acting_user(&headers)?;
    let (messages, m) = state
        .swap
        .list_messages(match_id, user, MESSAGE_PAGE_SIZE)
        .await?;

    Ok(Json(MessagesResponse {
        match_id: m.id,
        status: m.status,
        cancellation: m.cancellation,
        archival: m.archival,
        messages,
    }))
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let user = acting_user(&headers)?;
    let outcome = state
        .swap
        .send_message(match_id, user, &req.content)
        .await?;
    Ok(Json(outcome.message))
}

async fn typing(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ServerError> {
    let user = acting_user(&headers)?;
    state.swap.typing(match_id, user).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Realtime (SSE)
// ---------------------------------------------------------------------------

fn sse_stream(
    rx: tokio::sync::broadcast::Receiver<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // Lagged receivers skip dropped events and keep going.
    BroadcastStream::new(rx)
        .filter_map(|payload| payload.ok().map(|data| Ok(Event::default().data(data))))
}

async fn user_events(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = acting_user(&headers)?;
    let rx = state.hub.subscribe(&user_room(user));

    info!(user = %user, "realtime subscription opened");
    Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()))
}

async fn chat_events(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = acting_user(&headers)?;
    let room = state.swap.chat_room_for(match_id, user).await?;
    let rx = state.hub.subscribe(&room);

    Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
