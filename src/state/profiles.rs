use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Public profile of a player as shown in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub level: u32,
}

/// Read-only lookup of player profiles.
pub trait ProfileDirectory: Send + Sync {
    /// Profile of `user_id`, or `None` when the directory does not know them.
    fn get_profile(&self, user_id: &str) -> BoxFuture<'static, Option<Profile>>;
}

/// Directory backed by a fixed map, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileDirectory {
    profiles: Arc<HashMap<String, Profile>>,
}

impl StaticProfileDirectory {
    pub fn new(profiles: HashMap<String, Profile>) -> Self {
        Self {
            profiles: Arc::new(profiles),
        }
    }
}

impl ProfileDirectory for StaticProfileDirectory {
    fn get_profile(&self, user_id: &str) -> BoxFuture<'static, Option<Profile>> {
        let profile = self.profiles.get(user_id).cloned();
        Box::pin(async move { profile })
    }
}
