use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tandem_shared::api::{
    HistoryQuery, LoginRequest, LoginResponse, MarkReadRequest, MessagePage, PageQuery,
    Pagination, SuccessResponse, TotalUnreadResponse, UnreadCountsResponse, UploadResponse,
    UserProfile, UserSummary, UserWithLastMessage, UsersPage,
};
use tandem_shared::constants::MAX_PAGE_SIZE;
use tandem_shared::validation::validate_login;
use tandem_shared::normalize_email;
use tandem_store::{StoreError, User};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::ServerError;
use crate::media_store::{is_active_content, MediaStore};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub media: Arc<MediaStore>,
    pub http_limiter: RateLimiter<IpAddr>,
    pub config: Arc<ServerConfig>,
}

/// Every route is served both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    let routes = routes();

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        // Leave headroom so oversized uploads reach our own size check.
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes + 1024 * 1024))
        .layer(middleware::from_fn_with_state(
            state.http_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/messages", get(messages))
        .route("/messages/:user_email", get(messages_from_user))
        .route("/users", get(users))
        .route("/users-with-last-message", get(users_with_last_message))
        .route("/unread-counts/:user_email", get(unread_counts))
        .route("/total-unread/:user_email", get(total_unread))
        .route("/mark-read", post(mark_read))
        .route("/conversation/:user_email", get(conversation))
        .route("/upload", post(upload))
        .route("/uploads/:name", get(download))
        .route("/ws", get(ws_handler))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn profile(user: User) -> UserProfile {
    UserProfile {
        name: user.name,
        email: user.email,
        is_online: user.is_online,
        last_seen: user.last_seen,
        created_at: user.created_at,
    }
}

fn summary(user: User) -> UserSummary {
    UserSummary {
        name: user.name,
        email: user.email,
        is_online: user.is_online,
        last_seen: user.last_seen,
    }
}

fn user_not_found(err: StoreError) -> ServerError {
    match err {
        StoreError::NotFound => ServerError::NotFound("User"),
        other => other.into(),
    }
}

// ─── Identity ───

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ServerError> {
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();
    if name.is_empty() || email.is_empty() {
        return Err(ServerError::BadRequest(
            "Name and email are required".to_string(),
        ));
    }

    let config = Arc::clone(&state.config);
    let claims_admin = config.is_admin_email(&email);

    if req.is_admin {
        if !claims_admin || name != config.admin_name {
            warn!(email = %email, "Rejected admin login");
            return Err(ServerError::Unauthorized(
                "Invalid admin credentials".to_string(),
            ));
        }
        let (admin_name, admin_email) = (config.admin_name.clone(), config.admin_email.clone());
        let (user, _) = state
            .engine
            .db()
            .call(move |db| db.get_or_create_user(&admin_name, &admin_email))
            .await?;
        info!(email = %user.email, "Admin logged in");
        return Ok((
            StatusCode::OK,
            Json(LoginResponse {
                success: true,
                user: profile(user),
                is_admin: Some(true),
            }),
        ));
    }

    if claims_admin {
        warn!("Non-admin login attempted with the admin email");
        return Err(ServerError::Unauthorized(
            "Invalid admin credentials".to_string(),
        ));
    }

    let (name, email) = validate_login(&name, &email)?;
    let (user, created) = state
        .engine
        .db()
        .call(move |db| db.get_or_create_user(&name, &email))
        .await?;
    info!(email = %user.email, created, "User logged in");

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(LoginResponse {
            success: true,
            user: profile(user),
            is_admin: None,
        }),
    ))
}

// ─── History ───

async fn messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    if query.user1.trim().is_empty() || query.user2.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "user1 and user2 are required".to_string(),
        ));
    }
    let (limit, offset) = query.page().resolve();
    let (a, b) = (query.user1, query.user2);
    let (messages, has_more) = state
        .engine
        .db()
        .call(move |db| db.conversation_page(&a, &b, limit, offset))
        .await?;

    Ok(Json(MessagePage {
        messages,
        pagination: Pagination {
            limit,
            offset,
            has_more,
        },
    }))
}

/// Everything one user has sent, oldest first.
async fn messages_from_user(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let (limit, offset) = page.resolve();
    let sender = normalize_email(&user_email);
    let (messages, has_more) = state
        .engine
        .db()
        .call(move |db| db.messages_from(&sender, limit, offset))
        .await?;

    Ok(Json(MessagePage {
        messages,
        pagination: Pagination {
            limit,
            offset,
            has_more,
        },
    }))
}

/// The admin's thread with one user.
async fn conversation(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let (limit, offset) = page.resolve();
    let admin = state.config.admin_email.clone();
    let user = normalize_email(&user_email);
    let (messages, has_more) = state
        .engine
        .db()
        .call(move |db| db.conversation_page(&user, &admin, limit, offset))
        .await?;

    Ok(Json(MessagePage {
        messages,
        pagination: Pagination {
            limit,
            offset,
            has_more,
        },
    }))
}

// ─── Directory ───

async fn users(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<UsersPage>, ServerError> {
    let (limit, offset) = page.resolve();
    let (users, has_more) = state
        .engine
        .db()
        .call(move |db| db.list_users(limit, offset, None))
        .await?;

    Ok(Json(UsersPage {
        users: users.into_iter().map(summary).collect(),
        pagination: Pagination {
            limit,
            offset,
            has_more,
        },
    }))
}

async fn users_with_last_message(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserWithLastMessage>>, ServerError> {
    let admin = state.config.admin_email.clone();
    let mut entries = state
        .engine
        .db()
        .call(move |db| {
            let mut entries = Vec::new();
            let mut offset = 0;
            loop {
                let (page, has_more) = db.list_users(MAX_PAGE_SIZE, offset, Some(&admin))?;
                for user in page {
                    let last = db.last_message_between(&user.email, &admin)?;
                    entries.push(UserWithLastMessage {
                        last_message: last.as_ref().map(|m| m.text.clone()).unwrap_or_default(),
                        last_message_type: last.as_ref().map(|m| m.kind),
                        last_message_time: last.as_ref().map(|m| m.timestamp),
                        name: user.name,
                        email: user.email,
                        is_online: user.is_online,
                        last_seen: user.last_seen,
                    });
                }
                if !has_more {
                    break;
                }
                offset += MAX_PAGE_SIZE;
            }
            Ok(entries)
        })
        .await?;

    // Newest conversation first; `None` sorts below every timestamp.
    entries.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    Ok(Json(entries))
}

// ─── Unread counters ───

async fn unread_counts(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
) -> Result<Json<UnreadCountsResponse>, ServerError> {
    let user = state
        .engine
        .db()
        .call(move |db| db.get_user(&user_email))
        .await
        .map_err(user_not_found)?;
    Ok(Json(UnreadCountsResponse {
        unread_counts: user.unread_counts,
    }))
}

async fn total_unread(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
) -> Result<Json<TotalUnreadResponse>, ServerError> {
    let user = state
        .engine
        .db()
        .call(move |db| db.get_user(&user_email))
        .await
        .map_err(user_not_found)?;
    Ok(Json(TotalUnreadResponse {
        total_unread: user.total_unread(),
    }))
}

async fn mark_read(
    State(state): State<AppState>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<SuccessResponse>, ServerError> {
    state
        .engine
        .mark_conversation_read(&req.user_email, &req.sender_email)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ─── Media ───

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let mimetype = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read file: {}", e)))?;

        let uploaded = state
            .media
            .store(file_name.as_deref(), &mimetype, &data)
            .await?;
        info!(file = %uploaded.filename, size = uploaded.size, "File uploaded");
        return Ok(Json(uploaded));
    }

    Err(ServerError::BadRequest("No file uploaded".to_string()))
}

async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, mime) = state.media.open(&name).await?;
    let disposition = if is_active_content(mime) {
        "attachment"
    } else {
        "inline"
    };
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_DISPOSITION, disposition),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        data,
    ))
}

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
