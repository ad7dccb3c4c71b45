//! Explicit identity context.
//!
//! One `SessionContext` is created at startup and handed to whatever needs to
//! know who is signed in. Changes are published on a watch channel; listeners
//! registered through [`SessionContext::listen`] are torn down by
//! [`SessionContext::shutdown`].
//!
//! Backend calls made on behalf of the user go through
//! [`SessionContext::with_session`], which exchanges the refresh token for a
//! new session when the access token has expired and retries once.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{Credentials, Session, User};
use crate::storage::LocalStore;
use crate::supabase::{is_expired_token, is_rejected, AccountBackend};

pub const SESSION_KEY: &str = "authSession";

pub struct SessionContext {
    backend: Arc<dyn AccountBackend>,
    store: LocalStore,
    tx: watch::Sender<Option<Session>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionContext {
    pub fn new(backend: Arc<dyn AccountBackend>, store: LocalStore, initial: Option<Session>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            backend,
            store,
            tx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Restores a stored session, keeping it only if the backend still
    /// recognises its token or accepts its refresh token.
    pub async fn initialize(backend: Arc<dyn AccountBackend>, store: LocalStore) -> Self {
        let stored: Option<Session> = store.load(SESSION_KEY);
        let restored = match stored {
            Some(session) => restore(backend.as_ref(), session).await,
            None => return Self::new(backend, store, None),
        };
        let persisted = match &restored {
            Some(session) => store.save(SESSION_KEY, session),
            None => store.remove(SESSION_KEY),
        };
        if let Err(e) = persisted {
            warn!("Failed to update stored session: {}", e);
        }
        Self::new(backend, store, restored)
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.tx.borrow().as_ref().map(|s| s.user.clone())
    }

    /// The active session, or `Unauthenticated` when nobody is signed in.
    pub fn require(&self) -> Result<Session> {
        self.current().ok_or(AppError::Unauthenticated)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    /// Runs `op` with the active session. When the backend reports the
    /// access token as expired, the session is refreshed and `op` runs once
    /// more with the new one.
    pub async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let session = self.require()?;
        match op(session.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if is_expired_token(&e) => {
                debug!("Access token expired: {:#}", e);
                let fresh = self.refresh(&session).await?;
                op(fresh).await.map_err(AppError::account)
            }
            Err(e) => Err(AppError::account(e)),
        }
    }

    /// Replaces `stale` with a session obtained from its refresh token. A
    /// refused refresh signs the user out.
    pub async fn refresh(&self, stale: &Session) -> Result<Session> {
        let Some(token) = stale.refresh_token.as_deref() else {
            warn!("Session expired and has no refresh token");
            self.publish(None);
            return Err(AppError::Unauthenticated);
        };
        match self.backend.refresh_session(token).await {
            Ok(session) => {
                self.publish(Some(session.clone()));
                Ok(session)
            }
            Err(e) if is_rejected(&e) => {
                warn!("Session refresh refused: {:#}", e);
                self.publish(None);
                Err(AppError::Unauthenticated)
            }
            Err(e) => Err(AppError::account(e)),
        }
    }

    /// Runs `on_change` for every session change until shutdown.
    pub fn listen<F>(&self, on_change: F)
    where
        F: Fn(Option<&Session>) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                on_change(current.as_ref());
            }
        });
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(task);
        }
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>> {
        validate_credentials(credentials)?;
        let session = self
            .backend
            .sign_up(credentials)
            .await
            .map_err(AppError::account)?;
        if let Some(session) = &session {
            self.publish(Some(session.clone()));
        }
        Ok(session)
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        validate_credentials(credentials)?;
        let session = self
            .backend
            .sign_in(credentials)
            .await
            .map_err(AppError::account)?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    /// Signs out remotely, then forgets the local session. When the backend
    /// no longer accepts the session it is forgotten anyway; any other
    /// failure keeps it so the user can retry.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.current() else {
            return Ok(());
        };
        match self.backend.sign_out(&session).await {
            Ok(()) => {}
            Err(e) if is_rejected(&e) => {
                warn!("Backend no longer knows the session, signing out locally: {:#}", e);
            }
            Err(e) => return Err(AppError::account(e)),
        }
        self.publish(None);
        Ok(())
    }

    /// Stops every listener registered with [`listen`](Self::listen).
    pub fn shutdown(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for task in listeners.drain(..) {
                task.abort();
            }
        }
        debug!("Session listeners stopped");
    }

    fn publish(&self, session: Option<Session>) {
        let stored = match &session {
            Some(s) => self.store.save(SESSION_KEY, s),
            None => self.store.remove(SESSION_KEY),
        };
        if let Err(e) = stored {
            warn!("Failed to persist session: {}", e);
        }
        match &session {
            Some(s) => info!("Session active for {}", s.user.email.as_deref().unwrap_or(&s.user.id)),
            None => info!("Signed out"),
        }
        self.tx.send_replace(session);
    }
}

/// Checks a stored session against the backend. Sessions the backend refuses
/// are dropped; sessions that cannot be checked right now are kept as is.
async fn restore(backend: &dyn AccountBackend, mut session: Session) -> Option<Session> {
    match backend.fetch_user(&session.access_token).await {
        Ok(user) => {
            info!("Restored session for {}", user.email.as_deref().unwrap_or(&user.id));
            session.user = user;
            return Some(session);
        }
        Err(e) if is_expired_token(&e) => debug!("Stored access token expired"),
        Err(e) if is_rejected(&e) => {
            warn!("Stored session is no longer valid: {:#}", e);
            return None;
        }
        Err(e) => {
            warn!("Could not verify stored session, keeping it: {:#}", e);
            return Some(session);
        }
    }
    let token = session.refresh_token.clone()?;
    match backend.refresh_session(&token).await {
        Ok(fresh) => {
            info!("Restored session by refreshing its token");
            Some(fresh)
        }
        Err(e) if is_rejected(&e) => {
            warn!("Stored session could not be refreshed: {:#}", e);
            None
        }
        Err(e) => {
            warn!("Could not refresh stored session, keeping it: {:#}", e);
            Some(session)
        }
    }
}

fn validate_credentials(credentials: &Credentials) -> Result<()> {
    let email = credentials.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email is required"));
    }
    if credentials.password.is_empty() {
        return Err(AppError::validation("password is required"));
    }
    Ok(())
}
