use crate::account::AccountStore;
use crate::catalog::{CatalogController, CatalogView};
use crate::config::Config;
use crate::error::AppError;
use crate::favorites::FavoritesCache;
use crate::filters::FilterField;
use crate::models::{
    Credentials, FavoriteEntry, Genre, HistoryEntry, Movie, MovieDetails, MoviePage, NewReview,
    Review, Session, User,
};
use crate::recent::RecentSearches;
use crate::reviews::ReviewFeed;
use crate::session::SessionContext;
use crate::storage::LocalStore;
use crate::supabase::{AccountBackend, SupabaseClient};
use crate::tmdb::{self, TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn TmdbApi>,
    pub catalog: Arc<CatalogController>,
    pub favorites: Arc<Mutex<FavoritesCache>>,
    pub recent: Arc<Mutex<RecentSearches>>,
    pub account: AccountStore,
    pub session: Arc<SessionContext>,
}

impl AppState {
    pub fn new(
        tmdb: Arc<dyn TmdbApi>,
        backend: Arc<dyn AccountBackend>,
        store: LocalStore,
        session: SessionContext,
    ) -> Self {
        Self {
            catalog: Arc::new(CatalogController::new(tmdb.clone())),
            favorites: Arc::new(Mutex::new(FavoritesCache::load(store.clone()))),
            recent: Arc::new(Mutex::new(RecentSearches::load(store))),
            account: AccountStore::new(backend),
            session: Arc::new(session),
            tmdb,
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = LocalStore::open(&config.data_dir)?;
    info!("Using data directory {}", store.dir().display());

    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_language.clone(),
    )?);
    let backend: Arc<dyn AccountBackend> = Arc::new(SupabaseClient::new(
        &config.supabase_url,
        config.supabase_anon_key.clone(),
    )?);
    let session = SessionContext::initialize(backend.clone(), store.clone()).await;
    session.listen(|current| match current {
        Some(s) => info!("Session changed: user {}", s.user.id),
        None => info!("Session changed: signed out"),
    });

    let state = AppState::new(tmdb, backend, store, session);
    if let Err(e) = state.catalog.refresh().await {
        warn!("Initial catalog load failed: {}", e);
    }
    let session = state.session.clone();

    let app = build_router(state);
    info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    session.shutdown();
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/catalog", get(get_catalog))
        .route("/catalog/filters", post(set_filter).delete(clear_filters))
        .route("/catalog/refresh", post(refresh_catalog))
        .route("/genres", get(genres))
        .route("/top-rated", get(top_rated))
        .route("/search", get(search))
        .route("/search/recent", get(recent_searches))
        .route("/movies/:id", get(movie_page))
        .route("/movies/:id/reviews", get(list_reviews).post(submit_review))
        .route("/movies/:id/reviews/live", get(review_stream))
        .route("/favorites", get(list_favorites))
        .route("/favorites/toggle", post(toggle_favorite))
        .route("/favorites/:id", get(favorite_status))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/session", get(current_user))
        .route("/history", get(get_history).delete(clear_history))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Catalog(_) | AppError::Account(_) => StatusCode::BAD_GATEWAY,
            AppError::CorruptStorage(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.to_string(),
            "retry": self.is_retryable(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, AppError>;

async fn health() -> &'static str {
    "OK"
}

async fn get_catalog(State(state): State<AppState>) -> Json<CatalogView> {
    Json(state.catalog.view().await)
}

#[derive(Debug, Deserialize)]
struct FilterUpdate {
    field: String,
    #[serde(default)]
    value: String,
}

/// Refreshes and returns the view. A failed load is reported through the
/// view's status while the previous movies stay in place.
async fn refreshed_view(catalog: &CatalogController) -> Json<CatalogView> {
    if let Err(e) = catalog.refresh().await {
        warn!("Catalog refresh failed: {}", e);
    }
    Json(catalog.view().await)
}

async fn set_filter(
    State(state): State<AppState>,
    Json(update): Json<FilterUpdate>,
) -> ApiResult<CatalogView> {
    let field: FilterField = update.field.parse()?;
    state.catalog.set_filter(field, &update.value).await?;
    Ok(refreshed_view(&state.catalog).await)
}

async fn clear_filters(State(state): State<AppState>) -> Json<CatalogView> {
    state.catalog.clear_filters().await;
    refreshed_view(&state.catalog).await
}

async fn refresh_catalog(State(state): State<AppState>) -> Json<CatalogView> {
    refreshed_view(&state.catalog).await
}

async fn genres(State(state): State<AppState>) -> ApiResult<Vec<Genre>> {
    let genres = state.tmdb.genre_list().await.map_err(AppError::catalog)?;
    Ok(Json(genres))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

async fn top_rated(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> ApiResult<MoviePage> {
    let page = q.page.unwrap_or(1).max(1);
    let movies = state.tmdb.top_rated(page).await.map_err(AppError::catalog)?;
    Ok(Json(movies))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    page: Option<u32>,
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> ApiResult<MoviePage> {
    let term = q.q.trim();
    if term.is_empty() {
        return Err(AppError::validation("search query is required"));
    }
    state.recent.lock().await.record(term);
    let page = q.page.unwrap_or(1).max(1);
    let results = state
        .tmdb
        .search(term, page)
        .await
        .map_err(AppError::catalog)?;
    Ok(Json(results))
}

async fn recent_searches(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.recent.lock().await.terms().to_vec())
}

#[derive(Debug, Serialize)]
struct MovieView {
    details: MovieDetails,
    poster_url: Option<String>,
    backdrop_url: Option<String>,
    trailer_url: Option<String>,
    similar: Vec<Movie>,
    is_favorite: bool,
}

async fn movie_page(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<MovieView> {
    if id <= 0 {
        return Err(AppError::NotFound(format!("movie {}", id)));
    }
    let (details, similar) = tokio::try_join!(state.tmdb.details(id), state.tmdb.similar(id))
        .map_err(AppError::catalog)?;

    if state.session.current().is_some() {
        if let Err(e) = state
            .account
            .add_to_history(&state.session, &details.as_movie())
            .await
        {
            warn!("Failed to record history for movie {}: {}", id, e);
        }
    }

    let is_favorite = state.favorites.lock().await.is_favorite(id);
    Ok(Json(MovieView {
        poster_url: tmdb::image_url(details.poster_path.as_deref(), tmdb::POSTER_SIZE),
        backdrop_url: tmdb::image_url(details.backdrop_path.as_deref(), "original"),
        trailer_url: details.trailer_key().map(tmdb::youtube_url),
        similar: similar.movies,
        is_favorite,
        details,
    }))
}

async fn list_favorites(State(state): State<AppState>) -> Json<Vec<FavoriteEntry>> {
    Json(state.favorites.lock().await.list().to_vec())
}

#[derive(Debug, Serialize)]
struct FavoriteStatus {
    id: i64,
    favorite: bool,
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Json(movie): Json<Movie>,
) -> Json<FavoriteStatus> {
    let mut favorites = state.favorites.lock().await;
    let favorite = match favorites.toggle(&movie) {
        Some(now) => now,
        None => favorites.is_favorite(movie.id),
    };
    Json(FavoriteStatus {
        id: movie.id,
        favorite,
    })
}

async fn favorite_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Json<FavoriteStatus> {
    let favorite = state.favorites.lock().await.is_favorite(id);
    Json(FavoriteStatus { id, favorite })
}

#[derive(Debug, Serialize)]
struct SignUpResponse {
    session: Option<Session>,
    confirmation_required: bool,
}

async fn sign_up(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<SignUpResponse> {
    let session = state.session.sign_up(&credentials).await?;
    Ok(Json(SignUpResponse {
        confirmation_required: session.is_none(),
        session,
    }))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Session> {
    Ok(Json(state.session.sign_in(&credentials).await?))
}

async fn sign_out(State(state): State<AppState>) -> std::result::Result<StatusCode, AppError> {
    state.session.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_user(State(state): State<AppState>) -> Json<Option<User>> {
    Json(state.session.user())
}

async fn get_history(State(state): State<AppState>) -> ApiResult<Vec<HistoryEntry>> {
    Ok(Json(state.account.get_history(&state.session).await?))
}

async fn clear_history(State(state): State<AppState>) -> std::result::Result<StatusCode, AppError> {
    state.account.clear_history(&state.session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_reviews(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<Review>> {
    Ok(Json(state.account.get_reviews(id).await?))
}

#[derive(Debug, Deserialize)]
struct ReviewInput {
    rating: i32,
    #[serde(default)]
    comment: String,
}

async fn submit_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ReviewInput>,
) -> std::result::Result<(StatusCode, Json<Review>), AppError> {
    let user = state.session.user().ok_or(AppError::Unauthenticated)?;
    let username = display_name(&user);
    let review = NewReview {
        movie_id: id,
        user_id: user.id,
        username,
        rating: input.rating,
        comment: input.comment,
    };
    let saved = state.account.add_review(&state.session, &review).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Email local part, or the user id when there is no email.
fn display_name(user: &User) -> String {
    user.email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| user.id.clone())
}

/// Server-sent events carrying the full review list after every change.
/// The feed, and with it the realtime subscription, lives as long as the
/// client stays connected.
async fn review_stream(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, AppError>
{
    let feed = ReviewFeed::open(state.account.clone(), id).await?;
    info!("Streaming live reviews for movie {}", feed.movie_id());
    let updates = feed.updates();
    let events = stream::unfold((feed, updates, true), |(feed, mut updates, first)| async move {
        if !first && updates.changed().await.is_err() {
            return None;
        }
        let reviews = updates.borrow_and_update().clone();
        let event = Event::default()
            .event("reviews")
            .json_data(&reviews)
            .unwrap_or_else(|_| Event::default().comment("unserializable review list"));
        Some((Ok(event), (feed, updates, false)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
