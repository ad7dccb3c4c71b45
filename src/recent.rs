use tracing::error;

use crate::storage::LocalStore;

pub const RECENT_SEARCHES_KEY: &str = "recentSearches";
pub const MAX_RECENT_SEARCHES: usize = 5;

/// Most-recent-first list of submitted search terms.
#[derive(Debug)]
pub struct RecentSearches {
    store: LocalStore,
    terms: Vec<String>,
}

impl RecentSearches {
    pub fn load(store: LocalStore) -> Self {
        let mut terms: Vec<String> = store.load(RECENT_SEARCHES_KEY).unwrap_or_default();
        terms.truncate(MAX_RECENT_SEARCHES);
        Self { store, terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn record(&mut self, term: &str) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }
        self.terms.retain(|t| t != term);
        self.terms.insert(0, term.to_string());
        self.terms.truncate(MAX_RECENT_SEARCHES);
        if let Err(e) = self.store.save(RECENT_SEARCHES_KEY, &self.terms) {
            error!("Failed to persist recent searches: {}", e);
        }
    }
}
