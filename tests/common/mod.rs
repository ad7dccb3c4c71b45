#![allow(dead_code)]

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinedeck::filters::SortKey;
use cinedeck::models::{
    ChangeKind, Credentials, Credits, Genre, HistoryEntry, Movie, MovieDetails, MoviePage,
    NewHistoryEntry, NewReview, Review, ReviewChange, Session, User, Video, Videos,
};
use cinedeck::realtime::{ReviewCallback, Subscription};
use cinedeck::supabase::{AccountBackend, BackendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

pub fn movie(id: i64, title: &str) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        poster_path: Some(format!("/poster-{id}.jpg")),
        release_date: Some("2019-05-30".to_string()),
        vote_average: 7.5,
        genre_ids: Some(vec![18]),
        overview: Some("Overview".to_string()),
    }
}

fn page(movies: Vec<Movie>) -> MoviePage {
    MoviePage {
        total_pages: 1,
        total_results: movies.len() as u64,
        movies,
    }
}

/// Catalog gateway answering from canned data and recording the last call.
#[derive(Default)]
pub struct FakeTmdb {
    pub calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeTmdb {
    fn record(&self, call: String) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            bail!("TMDB HTTP error (status 503 Service Unavailable)");
        }
        Ok(())
    }

    pub fn last_call(&self) -> Option<String> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl cinedeck::tmdb::TmdbApi for FakeTmdb {
    async fn popular(&self, page_no: u32, sort: SortKey) -> anyhow::Result<MoviePage> {
        self.record(format!("popular:{page_no}:{sort}"))?;
        Ok(page(vec![movie(496243, "Parasite"), movie(550, "Fight Club")]))
    }
    async fn top_rated(&self, page_no: u32) -> anyhow::Result<MoviePage> {
        self.record(format!("top_rated:{page_no}"))?;
        Ok(page(vec![movie(238, "The Godfather")]))
    }
    async fn by_genre(&self, genre_id: i64, page_no: u32) -> anyhow::Result<MoviePage> {
        self.record(format!("genre:{genre_id}:{page_no}"))?;
        Ok(page(vec![movie(13, "Forrest Gump")]))
    }
    async fn by_year(&self, year: i32, page_no: u32) -> anyhow::Result<MoviePage> {
        self.record(format!("year:{year}:{page_no}"))?;
        Ok(page(vec![movie(496243, "Parasite")]))
    }
    async fn by_rating(&self, min: f64, max: f64, page_no: u32) -> anyhow::Result<MoviePage> {
        self.record(format!("rating:{min}:{max}:{page_no}"))?;
        Ok(page(vec![movie(550, "Fight Club")]))
    }
    async fn search(&self, query: &str, page_no: u32) -> anyhow::Result<MoviePage> {
        self.record(format!("search:{query}:{page_no}"))?;
        Ok(page(vec![movie(603, "The Matrix")]))
    }
    async fn details(&self, movie_id: i64) -> anyhow::Result<MovieDetails> {
        self.record(format!("details:{movie_id}"))?;
        Ok(MovieDetails {
            id: movie_id,
            title: "Parasite".to_string(),
            overview: Some("All unemployed, Ki-taek's family".to_string()),
            tagline: None,
            poster_path: Some("/parasite.jpg".to_string()),
            backdrop_path: None,
            release_date: Some("2019-05-30".to_string()),
            vote_average: 8.5,
            runtime: Some(133),
            genres: vec![Genre {
                id: 35,
                name: "Comedy".to_string(),
            }],
            credits: Credits::default(),
            videos: Videos {
                results: vec![Video {
                    key: "5xH0HfJHsaY".to_string(),
                    site: "YouTube".to_string(),
                    video_type: "Trailer".to_string(),
                    name: None,
                }],
            },
        })
    }
    async fn similar(&self, movie_id: i64) -> anyhow::Result<MoviePage> {
        self.record(format!("similar:{movie_id}"))?;
        Ok(page(vec![movie(550, "Fight Club")]))
    }
    async fn genre_list(&self) -> anyhow::Result<Vec<Genre>> {
        self.record("genres".to_string())?;
        Ok(vec![
            Genre {
                id: 28,
                name: "Action".to_string(),
            },
            Genre {
                id: 18,
                name: "Drama".to_string(),
            },
        ])
    }
}

pub const PASSWORD: &str = "hunter22";

pub fn user() -> User {
    User {
        id: "user-1".to_string(),
        email: Some("ann@example.com".to_string()),
    }
}

pub fn session() -> Session {
    Session {
        access_token: "token-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        user: user(),
    }
}

fn expired(what: &str) -> anyhow::Error {
    BackendError::new(what, 401, "JWT expired").into()
}

/// In-memory account backend. Review inserts are broadcast to realtime
/// subscribers the way the hosted backend pushes row changes.
pub struct MemoryBackend {
    pub history: Mutex<Vec<HistoryEntry>>,
    pub reviews: Mutex<Vec<Review>>,
    pub review_inserts: AtomicUsize,
    pub review_lists: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub fail_sign_out: AtomicBool,
    /// Access token the backend currently accepts.
    valid_token: Mutex<String>,
    /// Refresh token the backend currently accepts.
    valid_refresh: Mutex<Option<String>>,
    changes: broadcast::Sender<ReviewChange>,
    connected: watch::Sender<bool>,
    next_id: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            history: Mutex::new(Vec::new()),
            reviews: Mutex::new(Vec::new()),
            review_inserts: AtomicUsize::new(0),
            review_lists: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fail_sign_out: AtomicBool::new(false),
            valid_token: Mutex::new("token-1".to_string()),
            valid_refresh: Mutex::new(Some("refresh-1".to_string())),
            changes,
            connected: watch::channel(true).0,
            next_id: AtomicUsize::new(1),
        }
    }
}

impl MemoryBackend {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) as i64
    }

    /// Simulates a row change made by another client.
    pub fn push_change(&self, movie_id: i64, kind: ChangeKind) {
        let _ = self.changes.send(ReviewChange {
            kind,
            movie_id,
            record: None,
        });
    }

    pub fn add_foreign_review(&self, movie_id: i64, comment: &str) {
        let review = Review {
            id: self.next_id(),
            user_id: "user-2".to_string(),
            movie_id,
            username: "bob".to_string(),
            rating: 6,
            comment: comment.to_string(),
            created_at: Utc::now(),
        };
        self.reviews.lock().unwrap().push(review);
        self.push_change(movie_id, ChangeKind::Insert);
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Every access token handed out so far stops being accepted.
    pub fn expire_access_tokens(&self) {
        *self.valid_token.lock().unwrap() = "none".to_string();
    }

    /// The refresh token is revoked as well, so the session cannot recover.
    pub fn revoke_refresh_tokens(&self) {
        *self.valid_refresh.lock().unwrap() = None;
    }

    /// Cuts every realtime connection for good.
    pub fn drop_connections(&self) {
        self.connected.send_replace(false);
    }

    fn check(&self, session: &Session, what: &str) -> anyhow::Result<()> {
        if session.access_token == *self.valid_token.lock().unwrap() {
            Ok(())
        } else {
            Err(expired(what))
        }
    }
}

#[async_trait]
impl AccountBackend for MemoryBackend {
    async fn sign_up(&self, credentials: &Credentials) -> anyhow::Result<Option<Session>> {
        if credentials.email.starts_with("confirm") {
            return Ok(None);
        }
        Ok(Some(session()))
    }

    async fn sign_in(&self, credentials: &Credentials) -> anyhow::Result<Session> {
        if credentials.password != PASSWORD {
            return Err(BackendError::new("sign-in", 400, "Invalid login credentials").into());
        }
        Ok(session())
    }

    async fn sign_out(&self, session: &Session) -> anyhow::Result<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            bail!("sign-out: request failed");
        }
        self.check(session, "sign-out")?;
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_user(&self, access_token: &str) -> anyhow::Result<User> {
        if access_token == *self.valid_token.lock().unwrap() {
            Ok(user())
        } else {
            Err(expired("session lookup"))
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> anyhow::Result<Session> {
        let mut valid_refresh = self.valid_refresh.lock().unwrap();
        if valid_refresh.as_deref() != Some(refresh_token) {
            return Err(BackendError::new("session refresh", 400, "Invalid Refresh Token").into());
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
        let fresh = Session {
            access_token: format!("token-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            user: user(),
        };
        *self.valid_token.lock().unwrap() = fresh.access_token.clone();
        *valid_refresh = fresh.refresh_token.clone();
        Ok(fresh)
    }

    async fn find_history(&self, session: &Session, movie_id: i64) -> anyhow::Result<Option<i64>> {
        self.check(session, "history lookup")?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.user_id == session.user.id && h.movie_id == movie_id)
            .map(|h| h.id))
    }

    async fn insert_history(&self, session: &Session, entry: &NewHistoryEntry) -> anyhow::Result<()> {
        self.check(session, "history insert")?;
        let id = self.next_id();
        self.history.lock().unwrap().push(HistoryEntry {
            id,
            user_id: entry.user_id.clone(),
            movie_id: entry.movie_id,
            movie_title: entry.movie_title.clone(),
            movie_poster: entry.movie_poster.clone(),
            viewed_at: entry.viewed_at,
        });
        Ok(())
    }

    async fn touch_history(
        &self,
        session: &Session,
        entry_id: i64,
        viewed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.check(session, "history update")?;
        let mut history = self.history.lock().unwrap();
        let entry = history
            .iter_mut()
            .find(|h| h.id == entry_id)
            .ok_or_else(|| anyhow!("history update: no row {entry_id}"))?;
        entry.viewed_at = viewed_at;
        Ok(())
    }

    async fn list_history(&self, session: &Session) -> anyhow::Result<Vec<HistoryEntry>> {
        self.check(session, "history list")?;
        let mut rows: Vec<HistoryEntry> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.user_id == session.user.id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        Ok(rows)
    }

    async fn delete_history(&self, session: &Session) -> anyhow::Result<()> {
        self.check(session, "history clear")?;
        self.history
            .lock()
            .unwrap()
            .retain(|h| h.user_id != session.user.id);
        Ok(())
    }

    async fn insert_review(&self, session: &Session, review: &NewReview) -> anyhow::Result<Review> {
        self.check(session, "review insert")?;
        self.review_inserts.fetch_add(1, Ordering::SeqCst);
        let saved = Review {
            id: self.next_id(),
            user_id: review.user_id.clone(),
            movie_id: review.movie_id,
            username: review.username.clone(),
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: Utc::now(),
        };
        self.reviews.lock().unwrap().push(saved.clone());
        self.push_change(review.movie_id, ChangeKind::Insert);
        Ok(saved)
    }

    async fn list_reviews(&self, movie_id: i64) -> anyhow::Result<Vec<Review>> {
        self.review_lists.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<Review> = self
            .reviews
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.movie_id == movie_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn subscribe_reviews(
        &self,
        movie_id: i64,
        on_change: ReviewCallback,
    ) -> anyhow::Result<Subscription> {
        let mut rx = self.changes.subscribe();
        let mut connected = self.connected.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = rx.recv() => match change {
                        Ok(change) if change.movie_id == movie_id => on_change(change),
                        Ok(_) => {}
                        Err(_) => return,
                    },
                    res = connected.changed() => {
                        if res.is_err() || !*connected.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(Subscription::new(task))
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
