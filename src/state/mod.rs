pub mod match_record;
pub mod profiles;
pub mod questions;
pub mod resolution;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AppConfig, ControllerSettings},
    dao::match_store::MatchStore,
    error::ServiceError,
    services::{match_controller::MatchHandle, match_repository::MatchRepository},
    state::{
        profiles::{ProfileDirectory, StaticProfileDirectory},
        questions::QuestionBank,
    },
};

/// State shared by every handler and background task.
pub type SharedState = Arc<AppState>;

/// Controllers are keyed by `(match_id, player_id)`: one per player and match.
pub type ControllerKey = (String, String);

/// Central daemon state: store handle, configuration and running controllers.
pub struct AppState {
    match_store: RwLock<Option<Arc<dyn MatchStore>>>,
    degraded: watch::Sender<bool>,
    questions: Arc<QuestionBank>,
    profiles: Arc<dyn ProfileDirectory>,
    controller_settings: ControllerSettings,
    controllers: DashMap<ControllerKey, MatchHandle>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The daemon starts in degraded mode until a match store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let profiles = Arc::new(StaticProfileDirectory::new(config.profiles));
        Self::with_profiles(config.questions, config.controller, profiles)
    }

    /// Same as [`AppState::new`] with an explicit profile source.
    pub fn with_profiles(
        questions: QuestionBank,
        controller_settings: ControllerSettings,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            match_store: RwLock::new(None),
            degraded: degraded_tx,
            questions: Arc::new(questions),
            profiles,
            controller_settings,
            controllers: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Obtain a handle to the current match store, if one is installed.
    pub async fn match_store(&self) -> Option<Arc<dyn MatchStore>> {
        let guard = self.match_store.read().await;
        guard.as_ref().cloned()
    }

    /// Repository over the installed store, or [`ServiceError::Degraded`].
    pub async fn repository(&self) -> Result<MatchRepository, ServiceError> {
        if self.is_degraded().await {
            return Err(ServiceError::Degraded);
        }
        self.match_store()
            .await
            .map(MatchRepository::new)
            .ok_or(ServiceError::Degraded)
    }

    /// Install a new match store implementation and leave degraded mode.
    pub async fn install_match_store(&self, store: Arc<dyn MatchStore>) {
        {
            let mut guard = self.match_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current match store and enter degraded mode.
    pub async fn clear_match_store(&self) {
        {
            let mut guard = self.match_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        if *self.degraded.borrow() {
            return true;
        }
        let guard = self.match_store.read().await;
        guard.is_none()
    }

    /// Question bank loaded at startup.
    pub fn questions(&self) -> &Arc<QuestionBank> {
        &self.questions
    }

    /// Directory used to enrich lobby entries.
    pub fn profiles(&self) -> &Arc<dyn ProfileDirectory> {
        &self.profiles
    }

    /// Timings handed to every match controller.
    pub fn controller_settings(&self) -> &ControllerSettings {
        &self.controller_settings
    }

    /// Registry of running match controllers.
    pub fn controllers(&self) -> &DashMap<ControllerKey, MatchHandle> {
        &self.controllers
    }

    /// Token every controller derives its own cancellation from.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancel every running controller and forget their handles.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.controllers.clear();
    }

    /// Update and broadcast the degraded flag when the value changes.
    ///
    /// The installed store is kept, so a recovered backend can resume without
    /// reconnecting from scratch.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
