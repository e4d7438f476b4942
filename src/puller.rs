//! Puller - runs an action periodically on its own task
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → action.pull() → log outcome
//!     ↑
//!     └─── Commands (UpdateInterval, Shutdown)
//! ```
//!
//! The action runs inside the actor loop, so at most one invocation is in
//! flight and ticks missed while it runs are not queued up. Commands are
//! only looked at between invocations; `shutdown` therefore waits for a
//! running action to finish.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

/// Smallest interval accepted by [`Puller::new`]
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

const MIN_TEST_PERIOD: Duration = Duration::from_millis(1);

/// Work done on every tick of a puller
#[async_trait]
pub trait PullAction: Send + Sync + 'static {
    async fn pull(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> PullAction for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn pull(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

#[derive(Debug)]
enum PullerCommand {
    UpdateInterval { interval: Duration },
    Shutdown,
}

struct PullerActor {
    name: String,
    action: Arc<dyn PullAction>,
    command_rx: mpsc::Receiver<PullerCommand>,
    period: Duration,
}

impl PullerActor {
    fn ticker(period: Duration) -> Interval {
        // First tick one period from now, not immediately
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    #[instrument(skip(self), fields(puller = %self.name))]
    async fn run(mut self) {
        debug!("starting puller with interval {:?}", self.period);

        let mut ticker = Self::ticker(self.period);

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PullerCommand::UpdateInterval { interval }) => {
                            debug!("updating interval to {interval:?}");
                            self.period = interval;
                            ticker = Self::ticker(interval);
                        }
                        Some(PullerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.pull_once().await;
                }
            }
        }

        debug!("puller stopped");
    }

    async fn pull_once(&self) {
        trace!("running action");
        match AssertUnwindSafe(self.action.pull()).catch_unwind().await {
            Ok(Ok(())) => trace!("action finished"),
            Ok(Err(e)) => error!("puller action failed: {:#}", e),
            Err(_) => error!("puller action panicked"),
        }
    }
}

/// Handle to a running puller
///
/// The background task starts in the constructor and runs until
/// [`Puller::shutdown`] is awaited.
pub struct Puller {
    name: String,
    sender: mpsc::Sender<PullerCommand>,
    task: JoinHandle<()>,
    min_interval: Duration,
}

impl Puller {
    /// Start a puller; intervals below [`MIN_INTERVAL`] are raised to it
    pub fn new(name: impl Into<String>, interval: Duration, action: Arc<dyn PullAction>) -> Self {
        let name = name.into();
        let period = clamp_interval(&name, interval, MIN_INTERVAL);
        Self::spawn(name, period, action, MIN_INTERVAL)
    }

    /// Start a puller with a sub-second period
    pub fn with_period(
        name: impl Into<String>,
        period: Duration,
        action: Arc<dyn PullAction>,
    ) -> Self {
        Self::spawn(
            name.into(),
            period.max(MIN_TEST_PERIOD),
            action,
            MIN_TEST_PERIOD,
        )
    }

    fn spawn(
        name: String,
        period: Duration,
        action: Arc<dyn PullAction>,
        min_interval: Duration,
    ) -> Self {
        let (sender, command_rx) = mpsc::channel(8);
        let actor = PullerActor {
            name: name.clone(),
            action,
            command_rx,
            period,
        };
        let task = tokio::spawn(actor.run());

        Self {
            name,
            sender,
            task,
            min_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the interval; the timer restarts with the new period
    pub async fn update_interval(&self, interval: Duration) {
        let interval = clamp_interval(&self.name, interval, self.min_interval);
        if self
            .sender
            .send(PullerCommand::UpdateInterval { interval })
            .await
            .is_err()
        {
            warn!(puller = %self.name, "puller is not running, interval not updated");
        }
    }

    /// Stop the puller and wait until its task has exited
    pub async fn shutdown(self) {
        debug!(puller = %self.name, "stopping puller");
        // A closed channel means the task is already gone
        let _ = self.sender.send(PullerCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(puller = %self.name, "puller task failed: {e}");
        }
        debug!(puller = %self.name, "stopped puller");
    }
}

fn clamp_interval(name: &str, interval: Duration, min: Duration) -> Duration {
    if interval < min {
        warn!(puller = %name, "interval {interval:?} is too short, using {min:?}");
        min
    } else {
        interval
    }
}
