mod handler;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};

use crate::auth::jwt::JwtAccessTokenService;
use crate::config::RelayConfig;
use crate::gateway::Gateway;
use crate::router::BroadcastRouter;
use crate::store::SocialStore;

pub use handler::{chat_upgrade, notifications_upgrade};

/// Shared by every connection task.
#[derive(Clone)]
pub struct RelayState {
    pub gateway: Gateway,
    pub store: SocialStore,
    pub router: BroadcastRouter,
    pub max_frame_bytes: usize,
}

impl RelayState {
    pub fn new(
        jwt_service: Arc<JwtAccessTokenService>,
        socket_secret: &str,
        store: SocialStore,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            gateway: Gateway::new(jwt_service, socket_secret, store.clone()),
            store,
            router: BroadcastRouter::default(),
            max_frame_bytes,
        }
    }

    pub fn from_config(config: &RelayConfig, store: SocialStore) -> anyhow::Result<Self> {
        let jwt_service = Arc::new(
            JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?,
        );
        Ok(Self::new(jwt_service, &config.socket_secret, store, config.max_frame_bytes))
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/ws/chat/{id}", get(chat_upgrade))
        .route("/ws/notifications", get(notifications_upgrade))
        .with_state(state)
}
