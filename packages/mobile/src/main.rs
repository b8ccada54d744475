//! Composition root: load settings, build the session context, restore
//! sessions and keep the badge fresh until shutdown.

use std::sync::Arc;

use anyhow::Context;
use api::{MemoryPush, RestBackend};
use session::{
    BadgeWatcher, IdentityKind, SessionContext, SessionOptions, StudentProfile,
};
use store::{FileStore, SecureStore};
use tracing_subscriber::EnvFilter;

mod settings;

use settings::Settings;

const APP_NAME: &str = "campus";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("failed to load settings")?;

    let store: Arc<dyn SecureStore> = match &settings.storage.dir {
        Some(dir) => Arc::new(FileStore::new(dir.clone())),
        None => Arc::new(FileStore::in_data_dir(APP_NAME)),
    };
    let backend = Arc::new(RestBackend::new(settings.baas.clone())?);
    // No OS notification service in the headless runtime
    let push = Arc::new(MemoryPush::new());

    let ctx = SessionContext::new(
        store,
        backend,
        push,
        SessionOptions {
            push_project_id: settings.push.project_id.clone(),
        },
    );

    let report = ctx.bootstrap().await;
    for kind in IdentityKind::ALL {
        tracing::info!(%kind, signed_in = report.restored.contains(&kind), "identity");
    }

    let watcher = BadgeWatcher::start(ctx.clone(), settings.badge.debounce())
        .await
        .context("failed to subscribe to change feeds")?;

    let mut student = ctx.watch::<StudentProfile>();
    let log_changes = tokio::spawn(async move {
        while student.changed().await.is_ok() {
            let session = student.borrow_and_update().clone();
            tracing::info!(
                authenticated = session.is_authenticated(),
                status = ?session.profile().status,
                "student session changed"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    log_changes.abort();
    watcher.stop();
    Ok(())
}
