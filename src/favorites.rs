use tracing::{debug, error, warn};

use crate::models::{FavoriteEntry, Movie};
use crate::storage::LocalStore;

pub const FAVORITES_KEY: &str = "favoriteMovies";

/// Favorited movies, mirrored to the local store after every change.
#[derive(Debug)]
pub struct FavoritesCache {
    store: LocalStore,
    entries: Vec<FavoriteEntry>,
}

impl FavoritesCache {
    /// Rehydrates from the store. Missing or corrupt data starts empty.
    pub fn load(store: LocalStore) -> Self {
        let entries: Vec<FavoriteEntry> = store.load(FAVORITES_KEY).unwrap_or_default();
        debug!("Loaded {} favorites", entries.len());
        Self { store, entries }
    }

    pub fn is_favorite(&self, movie_id: i64) -> bool {
        movie_id > 0 && self.entries.iter().any(|f| f.id == movie_id)
    }

    pub fn list(&self) -> &[FavoriteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds or removes the movie and returns whether it is now a favorite.
    /// Returns `None` and leaves the set unchanged when the movie has no id.
    pub fn toggle(&mut self, movie: &Movie) -> Option<bool> {
        if movie.id <= 0 {
            warn!("Ignoring favorite toggle for movie without id: {:?}", movie.title);
            return None;
        }

        let now_favorite = if let Some(pos) = self.entries.iter().position(|f| f.id == movie.id) {
            self.entries.remove(pos);
            false
        } else {
            self.entries.push(FavoriteEntry::from(movie));
            true
        };
        self.persist();
        Some(now_favorite)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(FAVORITES_KEY, &self.entries) {
            error!("Failed to persist favorites: {}", e);
        }
    }
}
