//! Collection cycle shared by the Kea pullers
//!
//! A [`Collector`] walks all Kea apps known to storage and hands each one
//! to its [`TargetCollector`]. Apps are independent: a failing app is
//! counted and logged, the cycle moves on to the next one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace};

use super::resultset::ResultSetError;
use crate::agentcomm::{CommandError, ForwardError};
use crate::eventcenter::{EventCenter, Related};
use crate::model::{App, AppType};
use crate::puller::PullAction;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("malformed result set from {daemon}: {source}")]
    ResultSet {
        daemon: String,
        #[source]
        source: ResultSetError,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl CollectError {
    /// The agent could not be reached or did not answer properly
    pub fn is_communication_failure(&self) -> bool {
        matches!(self, CollectError::Forward(ForwardError::Transport { .. }))
    }
}

/// What happened to one app in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Collected,
    /// No relevant daemon is active; nothing was sent
    Skipped,
}

/// Result of one collection cycle
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Error of the last app that failed
    pub last_error: Option<CollectError>,
}

/// Per-app work of a concrete collector
#[async_trait]
pub trait TargetCollector: Send + Sync + 'static {
    /// What is being collected, e.g. "lease statistics"
    fn subject(&self) -> &'static str;

    async fn collect_target(&self, app: &App) -> Result<TargetStatus, CollectError>;
}

pub struct Collector<C> {
    inner: C,
    storage: Arc<dyn Storage>,
    events: Arc<dyn EventCenter>,
    /// Whether the last attempt to reach each app succeeded
    reachable: Mutex<HashMap<i64, bool>>,
}

impl<C: TargetCollector> Collector<C> {
    pub fn new(inner: C, storage: Arc<dyn Storage>, events: Arc<dyn EventCenter>) -> Self {
        Self {
            inner,
            storage,
            events,
            reachable: Mutex::new(HashMap::new()),
        }
    }

    pub fn target_collector(&self) -> &C {
        &self.inner
    }

    /// Run one cycle over all Kea apps
    ///
    /// Only failing to list the apps fails the cycle; app failures end up
    /// in the outcome.
    #[instrument(skip(self), fields(subject = self.inner.subject()))]
    pub async fn collect(&self) -> Result<CollectionOutcome, CollectError> {
        let apps = self.storage.list_apps_by_type(AppType::Kea).await?;
        let mut outcome = CollectionOutcome::default();

        for app in &apps {
            match self.inner.collect_target(app).await {
                Ok(TargetStatus::Collected) => {
                    outcome.succeeded += 1;
                    self.mark_reachable(app);
                }
                Ok(TargetStatus::Skipped) => {
                    trace!("app {} has no active DHCP daemons, skipped", app.id);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    error!(
                        "error occurred while getting {} from app {} on {}: {}",
                        self.inner.subject(),
                        app.id,
                        app.machine.address,
                        e
                    );
                    if e.is_communication_failure() {
                        self.mark_unreachable(app, &e);
                    }
                    outcome.failed += 1;
                    outcome.last_error = Some(e);
                }
            }
        }

        debug!(
            "collected {} from {} app(s), skipped {}, failed {}",
            self.inner.subject(),
            outcome.succeeded,
            outcome.skipped,
            outcome.failed
        );
        Ok(outcome)
    }

    fn mark_reachable(&self, app: &App) {
        let previous = self.reachable.lock().insert(app.id, true);
        if previous == Some(false) {
            self.events.add_info_event(
                "Communication with {app} on {machine} restored",
                &[Related::App(app), Related::Machine(&app.machine)],
            );
        }
    }

    fn mark_unreachable(&self, app: &App, error: &CollectError) {
        let previous = self.reachable.lock().insert(app.id, false);
        if previous != Some(false) {
            self.events.add_warning_event(
                &format!("Communication with {{app}} on {{machine}} failed: {error}"),
                &[Related::App(app), Related::Machine(&app.machine)],
            );
        }
    }
}

#[async_trait]
impl<C: TargetCollector> PullAction for Collector<C> {
    async fn pull(&self) -> anyhow::Result<()> {
        let outcome = self.collect().await?;
        if let Some(e) = outcome.last_error {
            return Err(anyhow::Error::new(e).context(format!(
                "some errors were encountered while gathering {} from kea apps",
                self.inner.subject()
            )));
        }
        info!(
            "gathered {} from {} kea app(s)",
            self.inner.subject(),
            outcome.succeeded
        );
        Ok(())
    }
}
