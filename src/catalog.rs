use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::filters::{resolve_query, FilterField, FilterSelection, RemoteQuery};
use crate::models::{Movie, MoviePage};
use crate::tmdb::TmdbApi;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub selection: FilterSelection,
    /// Query that produced `movies`; `None` until the first successful load.
    pub query: Option<RemoteQuery>,
    pub movies: Vec<Movie>,
    pub total_results: u64,
    pub status: LoadStatus,
}

#[derive(Debug, Default)]
struct CatalogState {
    selection: FilterSelection,
    applied: Option<RemoteQuery>,
    movies: Vec<Movie>,
    total_results: u64,
    status: Option<LoadStatus>,
}

/// Owns the filter selection and the movies currently displayed for it.
///
/// Each refresh takes a ticket from a monotonically increasing counter; only
/// the response carrying the newest ticket may replace the result set, so a
/// slow response to an older selection never overwrites a newer one.
pub struct CatalogController {
    tmdb: Arc<dyn TmdbApi>,
    state: Mutex<CatalogState>,
    generation: AtomicU64,
}

impl CatalogController {
    pub fn new(tmdb: Arc<dyn TmdbApi>) -> Self {
        Self {
            tmdb,
            state: Mutex::new(CatalogState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn selection(&self) -> FilterSelection {
        self.state.lock().await.selection.clone()
    }

    pub async fn set_filter(&self, field: FilterField, value: &str) -> Result<FilterSelection> {
        let mut state = self.state.lock().await;
        state.selection.set(field, value)?;
        debug!(?field, value, "Filter updated");
        Ok(state.selection.clone())
    }

    pub async fn clear_filters(&self) {
        self.state.lock().await.selection.clear();
        debug!("Filters reset");
    }

    /// Fetches the movies for the current selection.
    ///
    /// Returns `Ok(true)` when the response was applied and `Ok(false)` when a
    /// newer refresh superseded it. A failure keeps the previous movies and
    /// marks the view as failed.
    pub async fn refresh(&self) -> Result<bool> {
        let (ticket, query) = {
            let mut state = self.state.lock().await;
            let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.status = Some(LoadStatus::Loading);
            (ticket, resolve_query(&state.selection))
        };

        let result = run_query(self.tmdb.as_ref(), &query, 1).await;

        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(ticket, ?query, "Discarding stale catalog response");
            return Ok(false);
        }
        match result {
            Ok(page) => {
                info!(?query, count = page.movies.len(), "Catalog refreshed");
                state.total_results = page.total_results;
                state.movies = page.movies;
                state.applied = Some(query);
                state.status = Some(LoadStatus::Ready);
                Ok(true)
            }
            Err(e) => {
                warn!("Catalog refresh failed for {:?}: {:#}", query, e);
                let err = AppError::catalog(e);
                state.status = Some(LoadStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn view(&self) -> CatalogView {
        let state = self.state.lock().await;
        CatalogView {
            selection: state.selection.clone(),
            query: state.applied.clone(),
            movies: state.movies.clone(),
            total_results: state.total_results,
            status: state.status.clone().unwrap_or(LoadStatus::Idle),
        }
    }
}

/// Dispatches a resolved query to the matching gateway call.
pub async fn run_query(
    tmdb: &dyn TmdbApi,
    query: &RemoteQuery,
    page: u32,
) -> anyhow::Result<MoviePage> {
    match query {
        RemoteQuery::Popular { sort } => tmdb.popular(page, *sort).await,
        RemoteQuery::ByGenre { genre } => tmdb.by_genre(*genre, page).await,
        RemoteQuery::ByYear { year } => tmdb.by_year(*year, page).await,
        RemoteQuery::ByRating { min, max } => tmdb.by_rating(*min, *max, page).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::SortKey;
    use crate::models::{Genre, MovieDetails};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    fn movie(id: i64, title: &str) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            poster_path: None,
            release_date: None,
            vote_average: 7.0,
            genre_ids: None,
            overview: None,
        }
    }

    fn page(movies: Vec<Movie>) -> MoviePage {
        MoviePage {
            total_pages: 1,
            total_results: movies.len() as u64,
            movies,
        }
    }

    /// Catalog whose year query blocks until the test releases it.
    #[derive(Default)]
    struct GatedTmdb {
        year_started: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        year_gate: Mutex<Option<oneshot::Receiver<()>>>,
        fail: AtomicBool,
        last_sort: std::sync::Mutex<Option<SortKey>>,
    }

    #[async_trait]
    impl TmdbApi for GatedTmdb {
        async fn popular(&self, _page: u32, sort: SortKey) -> anyhow::Result<MoviePage> {
            *self.last_sort.lock().unwrap() = Some(sort);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("network down");
            }
            Ok(page(vec![movie(1, "Popular")]))
        }
        async fn top_rated(&self, _page: u32) -> anyhow::Result<MoviePage> {
            Ok(page(vec![]))
        }
        async fn by_genre(&self, genre_id: i64, _page: u32) -> anyhow::Result<MoviePage> {
            Ok(page(vec![movie(genre_id, "Genre pick")]))
        }
        async fn by_year(&self, year: i32, _page: u32) -> anyhow::Result<MoviePage> {
            if let Some(tx) = self.year_started.lock().unwrap().take() {
                let _ = tx.send(());
            }
            let gate = self.year_gate.lock().await.take();
            if let Some(rx) = gate {
                let _ = rx.await;
            }
            Ok(page(vec![movie(i64::from(year), "Year pick")]))
        }
        async fn by_rating(&self, _min: f64, _max: f64, _page: u32) -> anyhow::Result<MoviePage> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("network down");
            }
            Ok(page(vec![movie(8, "Rated")]))
        }
        async fn search(&self, _query: &str, _page: u32) -> anyhow::Result<MoviePage> {
            Ok(page(vec![]))
        }
        async fn details(&self, _movie_id: i64) -> anyhow::Result<MovieDetails> {
            anyhow::bail!("not used")
        }
        async fn similar(&self, _movie_id: i64) -> anyhow::Result<MoviePage> {
            Ok(page(vec![]))
        }
        async fn genre_list(&self) -> anyhow::Result<Vec<Genre>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn later_request_wins_when_earlier_completes_last() {
        let (started_tx, started_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel();
        let tmdb = Arc::new(GatedTmdb {
            year_started: std::sync::Mutex::new(Some(started_tx)),
            year_gate: Mutex::new(Some(gate_rx)),
            ..Default::default()
        });
        let catalog = Arc::new(CatalogController::new(tmdb));

        catalog.set_filter(FilterField::Year, "2014").await.unwrap();
        let slow = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.refresh().await })
        };
        started_rx.await.expect("year query started");

        catalog.set_filter(FilterField::Genre, "28").await.unwrap();
        assert!(catalog.refresh().await.unwrap());

        gate_tx.send(()).unwrap();
        let applied = slow.await.expect("join").expect("refresh");
        assert!(!applied);

        let view = catalog.view().await;
        assert_eq!(view.movies, vec![movie(28, "Genre pick")]);
        assert_eq!(view.status, LoadStatus::Ready);
    }

    #[tokio::test]
    async fn failure_keeps_previous_movies() {
        let tmdb = Arc::new(GatedTmdb::default());
        let catalog = CatalogController::new(tmdb.clone());
        assert!(catalog.refresh().await.unwrap());

        tmdb.fail.store(true, Ordering::SeqCst);
        let err = catalog.refresh().await.unwrap_err();
        assert!(matches!(err, AppError::Catalog(_)));

        let view = catalog.view().await;
        assert_eq!(view.movies, vec![movie(1, "Popular")]);
        assert!(matches!(view.status, LoadStatus::Failed(_)));
    }

    #[tokio::test]
    async fn view_reports_query_behind_displayed_movies() {
        let tmdb = Arc::new(GatedTmdb::default());
        let catalog = CatalogController::new(tmdb.clone());
        assert!(catalog.refresh().await.unwrap());
        let popular = Some(RemoteQuery::Popular {
            sort: SortKey::PopularityDesc,
        });

        catalog.set_filter(FilterField::Genre, "28").await.unwrap();
        assert_eq!(catalog.view().await.query, popular);

        tmdb.fail.store(true, Ordering::SeqCst);
        catalog.set_filter(FilterField::Genre, "").await.unwrap();
        catalog.set_filter(FilterField::Rating, "7").await.unwrap();
        assert!(catalog.refresh().await.is_err());
        let view = catalog.view().await;
        assert_eq!(view.query, popular);
        assert_eq!(view.movies, vec![movie(1, "Popular")]);

        tmdb.fail.store(false, Ordering::SeqCst);
        assert!(catalog.refresh().await.unwrap());
        assert_eq!(
            catalog.view().await.query,
            Some(RemoteQuery::ByRating { min: 6.0, max: 7.0 })
        );
    }

    #[tokio::test]
    async fn cleared_filters_query_popular_by_popularity() {
        let tmdb = Arc::new(GatedTmdb::default());
        let catalog = CatalogController::new(tmdb.clone());
        catalog.set_filter(FilterField::Rating, "8").await.unwrap();
        catalog.set_filter(FilterField::Sort, "vote_average.desc").await.unwrap();
        catalog.clear_filters().await;
        catalog.refresh().await.unwrap();

        assert_eq!(*tmdb.last_sort.lock().unwrap(), Some(SortKey::PopularityDesc));
        assert_eq!(catalog.selection().await, FilterSelection::default());
    }

    #[tokio::test]
    async fn rating_filter_dispatches_range_query() {
        let catalog = CatalogController::new(Arc::new(GatedTmdb::default()));
        catalog.set_filter(FilterField::Rating, "9+").await.unwrap();
        catalog.refresh().await.unwrap();
        let view = catalog.view().await;
        assert_eq!(view.query, Some(RemoteQuery::ByRating { min: 8.0, max: 9.0 }));
        assert_eq!(view.movies[0].title, "Rated");
    }

    #[tokio::test]
    async fn fresh_controller_is_idle() {
        let catalog = CatalogController::new(Arc::new(GatedTmdb::default()));
        let view = catalog.view().await;
        assert_eq!(view.status, LoadStatus::Idle);
        assert!(view.movies.is_empty());
        assert!(view.query.is_none());
    }
}
