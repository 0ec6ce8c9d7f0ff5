//! One-time service initialization.

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::models::{NewUser, User};
use crate::store::ResilientStore;

/// Make sure the configured seed user exists.
///
/// Returns `None` when seeding is disabled, otherwise the existing or newly
/// created user. Runs against the resilient store, so a seed created while
/// the durable backend is down lands in the volatile backend.
pub async fn seed_default_user(
    store: &ResilientStore,
    config: &BootstrapConfig,
) -> Result<Option<User>> {
    if !config.seed_user {
        return Ok(None);
    }

    if let Some(existing) = store.get_user_by_username(&config.username).await {
        tracing::debug!(username = %existing.username, "seed user already present");
        return Ok(Some(existing));
    }

    let user = store
        .create_user(NewUser {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
    tracing::info!(username = %user.username, id = user.id, "created seed user");
    Ok(Some(user))
}
