use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{HistoryEntry, Movie, NewHistoryEntry, NewReview, Review, ReviewChange};
use crate::realtime::Subscription;
use crate::session::SessionContext;
use crate::supabase::AccountBackend;

pub const MIN_COMMENT_CHARS: usize = 3;
pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 10;

/// Reviews and watch history for the signed-in user, with the checks that
/// must hold before anything is sent to the backend.
#[derive(Clone)]
pub struct AccountStore {
    backend: Arc<dyn AccountBackend>,
}

impl AccountStore {
    pub fn new(backend: Arc<dyn AccountBackend>) -> Self {
        Self { backend }
    }

    /// Records a visit. A second visit to the same movie only moves the
    /// existing entry's timestamp forward.
    pub async fn add_to_history(&self, ctx: &SessionContext, movie: &Movie) -> Result<()> {
        let session = ctx.require()?;
        if session.user.id.trim().is_empty() {
            return Err(AppError::validation("user id is required"));
        }
        if movie.id <= 0 {
            return Err(AppError::validation("a movie with an id is required"));
        }

        let backend = &self.backend;
        let movie_id = movie.id;
        let now = Utc::now();
        let existing = ctx
            .with_session(|s| async move { backend.find_history(&s, movie_id).await })
            .await?;
        match existing {
            Some(entry_id) => {
                debug!(entry_id, movie_id, "Updating history timestamp");
                ctx.with_session(|s| async move { backend.touch_history(&s, entry_id, now).await })
                    .await?;
            }
            None => {
                let entry = &NewHistoryEntry::for_movie(&session.user.id, movie, now);
                ctx.with_session(|s| async move { backend.insert_history(&s, entry).await })
                    .await?;
                info!("Added '{}' to watch history", entry.movie_title);
            }
        }
        Ok(())
    }

    pub async fn get_history(&self, ctx: &SessionContext) -> Result<Vec<HistoryEntry>> {
        let backend = &self.backend;
        ctx.with_session(|s| async move { backend.list_history(&s).await })
            .await
    }

    pub async fn clear_history(&self, ctx: &SessionContext) -> Result<()> {
        let backend = &self.backend;
        ctx.with_session(|s| async move { backend.delete_history(&s).await })
            .await?;
        info!("Cleared watch history");
        Ok(())
    }

    pub async fn add_review(&self, ctx: &SessionContext, review: &NewReview) -> Result<Review> {
        let session = ctx.require()?;
        validate_review(review)?;
        if review.user_id != session.user.id {
            return Err(AppError::validation("review author does not match the signed-in user"));
        }
        let backend = &self.backend;
        let saved = ctx
            .with_session(|s| async move { backend.insert_review(&s, review).await })
            .await?;
        info!(movie_id = review.movie_id, rating = review.rating, "Review submitted");
        Ok(saved)
    }

    pub async fn get_reviews(&self, movie_id: i64) -> Result<Vec<Review>> {
        if movie_id <= 0 {
            return Err(AppError::validation("movie id is required"));
        }
        self.backend
            .list_reviews(movie_id)
            .await
            .map_err(AppError::account)
    }

    pub async fn subscribe_reviews<F>(&self, movie_id: i64, on_change: F) -> Result<Subscription>
    where
        F: Fn(ReviewChange) + Send + Sync + 'static,
    {
        if movie_id <= 0 {
            return Err(AppError::validation("movie id is required"));
        }
        self.backend
            .subscribe_reviews(movie_id, Arc::new(on_change))
            .await
            .map_err(AppError::account)
    }
}

/// Checks a review before submission: every field present, rating an
/// integer in 1..=10 and a comment of at least three characters.
pub fn validate_review(review: &NewReview) -> Result<()> {
    if review.movie_id <= 0
        || review.user_id.trim().is_empty()
        || review.username.trim().is_empty()
        || review.comment.trim().is_empty()
    {
        return Err(AppError::validation("all fields are required"));
    }
    if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
        return Err(AppError::validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    if review.comment.chars().count() < MIN_COMMENT_CHARS {
        return Err(AppError::validation(format!(
            "comment must be at least {MIN_COMMENT_CHARS} characters long"
        )));
    }
    Ok(())
}
