use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::account::AccountStore;
use crate::error::Result;
use crate::models::Review;
use crate::realtime::Subscription;

/// Review list for one movie kept current by re-fetching it whenever the
/// realtime channel reports any change.
pub struct ReviewFeed {
    movie_id: i64,
    reviews: watch::Receiver<Vec<Review>>,
    subscription: Option<Subscription>,
    refetcher: Option<JoinHandle<()>>,
}

impl ReviewFeed {
    pub async fn open(store: AccountStore, movie_id: i64) -> Result<Self> {
        let initial = store.get_reviews(movie_id).await?;
        let (publish, reviews) = watch::channel(initial);

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let subscription = store
            .subscribe_reviews(movie_id, move |change| {
                debug!(kind = ?change.kind, "Review change, scheduling refetch");
                let _ = tx.send(());
            })
            .await?;

        let refetcher = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Several changes queued up need a single refetch.
                while rx.try_recv().is_ok() {}
                match store.get_reviews(movie_id).await {
                    Ok(fresh) => {
                        publish.send_replace(fresh);
                    }
                    Err(e) => warn!("Failed to refresh reviews for {}: {}", movie_id, e),
                }
            }
        });

        Ok(Self {
            movie_id,
            reviews,
            subscription: Some(subscription),
            refetcher: Some(refetcher),
        })
    }

    pub fn movie_id(&self) -> i64 {
        self.movie_id
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.reviews.borrow().clone()
    }

    /// Receiver that wakes on every refetched list.
    pub fn updates(&self) -> watch::Receiver<Vec<Review>> {
        self.reviews.clone()
    }

    /// False once closed, or once the realtime channel died and could not
    /// be re-established.
    pub fn is_open(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    /// Unsubscribes; no refetch runs after this returns.
    pub fn close(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(task) = self.refetcher.take() {
            task.abort();
        }
    }
}

impl Drop for ReviewFeed {
    fn drop(&mut self) {
        self.close();
    }
}
