use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::models::{Credentials, HistoryEntry, NewHistoryEntry, NewReview, Review, Session, User};
use crate::realtime::{RealtimeClient, ReviewCallback, Subscription};

const HISTORY_TABLE: &str = "watch_history";
const REVIEWS_TABLE: &str = "reviews";

/// Non-2xx answer from GoTrue or PostgREST, kept typed so callers can tell an
/// expired token from an outage.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{what}: HTTP error (status {status}): {message}")]
pub struct BackendError {
    pub what: String,
    pub status: u16,
    pub message: String,
}

impl BackendError {
    pub fn new(what: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            status,
            message: message.into(),
        }
    }
}

fn backend_status(err: &anyhow::Error) -> Option<u16> {
    err.downcast_ref::<BackendError>().map(|e| e.status)
}

/// The access token was not accepted; a refresh may recover the session.
pub fn is_expired_token(err: &anyhow::Error) -> bool {
    backend_status(err) == Some(401)
}

/// The backend refused the credentials outright (bad or revoked token,
/// unknown session). Network failures and 5xx answers are not rejections.
pub fn is_rejected(err: &anyhow::Error) -> bool {
    backend_status(err).is_some_and(|s| (400..500).contains(&s))
}

/// Row-level and auth operations against the hosted account backend.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// Returns `None` when the backend created the user but wants the email
    /// confirmed before issuing a session.
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>>;
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;
    async fn sign_out(&self, session: &Session) -> Result<()>;
    async fn fetch_user(&self, access_token: &str) -> Result<User>;
    /// Exchanges a refresh token for a new session.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session>;

    async fn find_history(&self, session: &Session, movie_id: i64) -> Result<Option<i64>>;
    async fn insert_history(&self, session: &Session, entry: &NewHistoryEntry) -> Result<()>;
    async fn touch_history(
        &self,
        session: &Session,
        entry_id: i64,
        viewed_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn list_history(&self, session: &Session) -> Result<Vec<HistoryEntry>>;
    async fn delete_history(&self, session: &Session) -> Result<()>;

    async fn insert_review(&self, session: &Session, review: &NewReview) -> Result<Review>;
    async fn list_reviews(&self, movie_id: i64) -> Result<Vec<Review>>;
    async fn subscribe_reviews(
        &self,
        movie_id: i64,
        on_change: ReviewCallback,
    ) -> Result<Subscription>;
}

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    realtime: RealtimeClient,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let anon_key = anon_key.into();
        let user_agent = format!("cinedeck/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build Supabase HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            realtime: RealtimeClient::new(&base_url, anon_key.clone()),
            base_url,
            anon_key,
        })
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.anon_key);
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let text = self.send(req, what).await?;
        serde_json::from_str(&text).with_context(|| format!("{what}: JSON parse failed"))
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<String> {
        let res = req
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("{what}: reading body failed"))?;
        if !status.is_success() {
            return Err(BackendError::new(what, status.as_u16(), backend_message(&text)).into());
        }
        Ok(text)
    }
}

/// Pulls the human-readable message out of a GoTrue/PostgREST error body.
fn backend_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "msg", alias = "error_description")]
        message: Option<String>,
    }
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string())
}

#[derive(Debug, Deserialize)]
struct RowId {
    id: i64,
}

#[async_trait]
impl AccountBackend for SupabaseClient {
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>> {
        let req = self
            .request(Method::POST, "/auth/v1/signup", None)
            .json(credentials);
        let body: Value = self.send_json(req, "sign-up").await?;
        if body.get("access_token").is_some() {
            let session: Session =
                serde_json::from_value(body).context("sign-up: session parse failed")?;
            return Ok(Some(session));
        }
        debug!("Sign-up accepted, awaiting email confirmation");
        Ok(None)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let req = self
            .request(Method::POST, "/auth/v1/token?grant_type=password", None)
            .json(credentials);
        self.send_json(req, "sign-in").await
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let req = self.request(Method::POST, "/auth/v1/logout", Some(&session.access_token));
        self.send(req, "sign-out").await.map(|_| ())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User> {
        let req = self.request(Method::GET, "/auth/v1/user", Some(access_token));
        self.send_json(req, "session lookup").await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let req = self
            .request(Method::POST, "/auth/v1/token?grant_type=refresh_token", None)
            .json(&json!({ "refresh_token": refresh_token }));
        self.send_json(req, "session refresh").await
    }

    async fn find_history(&self, session: &Session, movie_id: i64) -> Result<Option<i64>> {
        let path = format!(
            "/rest/v1/{HISTORY_TABLE}?select=id&user_id=eq.{}&movie_id=eq.{movie_id}&limit=1",
            urlencoding::encode(&session.user.id)
        );
        let req = self.request(Method::GET, &path, Some(&session.access_token));
        let rows: Vec<RowId> = self.send_json(req, "history lookup").await?;
        Ok(rows.first().map(|r| r.id))
    }

    async fn insert_history(&self, session: &Session, entry: &NewHistoryEntry) -> Result<()> {
        let req = self
            .request(
                Method::POST,
                &format!("/rest/v1/{HISTORY_TABLE}"),
                Some(&session.access_token),
            )
            .header("Prefer", "return=minimal")
            .json(entry);
        self.send(req, "history insert").await.map(|_| ())
    }

    async fn touch_history(
        &self,
        session: &Session,
        entry_id: i64,
        viewed_at: DateTime<Utc>,
    ) -> Result<()> {
        let req = self
            .request(
                Method::PATCH,
                &format!("/rest/v1/{HISTORY_TABLE}?id=eq.{entry_id}"),
                Some(&session.access_token),
            )
            .header("Prefer", "return=minimal")
            .json(&json!({ "viewed_at": viewed_at }));
        self.send(req, "history update").await.map(|_| ())
    }

    async fn list_history(&self, session: &Session) -> Result<Vec<HistoryEntry>> {
        let path = format!(
            "/rest/v1/{HISTORY_TABLE}?select=*&user_id=eq.{}&order=viewed_at.desc",
            urlencoding::encode(&session.user.id)
        );
        let req = self.request(Method::GET, &path, Some(&session.access_token));
        self.send_json(req, "history list").await
    }

    async fn delete_history(&self, session: &Session) -> Result<()> {
        let path = format!(
            "/rest/v1/{HISTORY_TABLE}?user_id=eq.{}",
            urlencoding::encode(&session.user.id)
        );
        let req = self.request(Method::DELETE, &path, Some(&session.access_token));
        self.send(req, "history clear").await.map(|_| ())
    }

    async fn insert_review(&self, session: &Session, review: &NewReview) -> Result<Review> {
        let body = json!({
            "user_id": review.user_id,
            "movie_id": review.movie_id,
            "username": review.username,
            "rating": review.rating,
            "comment": review.comment,
            "created_at": Utc::now(),
        });
        let req = self
            .request(
                Method::POST,
                &format!("/rest/v1/{REVIEWS_TABLE}"),
                Some(&session.access_token),
            )
            .header("Prefer", "return=representation")
            .json(&body);
        let mut rows: Vec<Review> = self.send_json(req, "review insert").await?;
        rows.pop()
            .ok_or_else(|| anyhow!("review insert: backend returned no row"))
    }

    async fn list_reviews(&self, movie_id: i64) -> Result<Vec<Review>> {
        let path = format!(
            "/rest/v1/{REVIEWS_TABLE}?select=*&movie_id=eq.{movie_id}&order=created_at.desc"
        );
        let req = self.request(Method::GET, &path, None);
        self.send_json(req, "review list").await
    }

    async fn subscribe_reviews(
        &self,
        movie_id: i64,
        on_change: ReviewCallback,
    ) -> Result<Subscription> {
        self.realtime.subscribe_reviews(movie_id, on_change).await
    }
}
