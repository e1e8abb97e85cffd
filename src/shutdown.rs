//! Coalesces interrupt/termination signals into one graceful shutdown
//! sequence; a second signal during that sequence forces immediate exit.
//!
//! Grounded on the teacher's `interactive::signals::SignalHandler`
//! (first-signal-sets-a-flag, second-signal-within-a-window-forces-exit)
//! rewritten around `ctrlc` directly rather than a thread-based debounce,
//! since the spec's "second signal during shutdown" window is the shutdown
//! sequence itself, not a fixed timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::activity::ActivityStore;
use crate::broker::QuestionBroker;
use crate::facade::AgentFacade;
use crate::log::RingLog;
use crate::notify::NotificationManager;
use crate::server::Server;
use crate::{Error, Result};

pub struct ShutdownManager {
    facade: Arc<AgentFacade>,
    broker: Arc<QuestionBroker>,
    server: Arc<Server>,
    log: Arc<RingLog>,
    notifications: Arc<NotificationManager>,
    shutting_down: Arc<AtomicBool>,
    force_exit: Arc<AtomicBool>,
    signalled: Arc<Notify>,
}

impl ShutdownManager {
    pub fn new(
        facade: Arc<AgentFacade>,
        broker: Arc<QuestionBroker>,
        server: Arc<Server>,
        log: Arc<RingLog>,
        notifications: Arc<NotificationManager>,
    ) -> Self {
        Self {
            facade,
            broker,
            server,
            log,
            notifications,
            shutting_down: Arc::new(AtomicBool::new(false)),
            force_exit: Arc::new(AtomicBool::new(false)),
            signalled: Arc::new(Notify::new()),
        }
    }

    /// Install the OS signal handler. The first signal wakes
    /// [`Self::wait_for_signal`] so an async caller can run the teardown
    /// sequence; a second signal forces immediate exit from the handler
    /// itself, since the teardown task may be stuck.
    pub fn install(&self) -> Result<()> {
        let shutting_down = self.shutting_down.clone();
        let force_exit = self.force_exit.clone();
        let signalled = self.signalled.clone();

        ctrlc::set_handler(move || {
            if shutting_down.swap(true, Ordering::SeqCst) {
                warn!("second interrupt received during shutdown, forcing exit");
                force_exit.store(true, Ordering::SeqCst);
                std::process::exit(130);
            }
            info!("shutdown signal received");
            signalled.notify_one();
        })
        .map_err(|e| Error::Config(format!("failed to install signal handler: {e}")))?;

        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Suspends until the first interrupt/termination signal arrives.
    pub async fn wait_for_signal(&self) {
        self.signalled.notified().await;
    }

    /// Run the teardown sequence once. Exits the process with code 0 on
    /// completion (130 is handled directly by the signal handler above for
    /// the forced-exit path).
    pub async fn run(&self) -> ! {
        info!("shutting down: stopping new work");
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.facade.is_running() {
            warn!("agent command still in flight at shutdown, it will be abandoned");
        }

        self.broker.reject_all("shutting down");
        self.server.close().await;
        if let Err(e) = self.log.flush() {
            warn!("failed to flush log during shutdown: {e}");
        }
        self.notifications.close().await;

        info!("shutdown complete");
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{AgentFacade, AgentRuntime};
    use crate::notify::NotificationManager;
    use crate::state::StateStore;
    use async_trait::async_trait;

    struct NoopRuntime;

    #[async_trait]
    impl AgentRuntime for NoopRuntime {
        async fn stream(&self, _prompt: &str) -> Result<Vec<crate::facade::AgentMessage>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn run_rejects_pending_questions_and_exits_cleanly_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::create_fresh(dir.path().join("state.json")));
        let broker = Arc::new(QuestionBroker::new(store));
        let facade = Arc::new(AgentFacade::new(Box::new(NoopRuntime), broker.clone(), Arc::new(RingLog::new(None))));
        let server = Server::new();
        let log = Arc::new(RingLog::new(None));
        let notifications = Arc::new(NotificationManager::new(vec![]));

        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move {
            broker2.handle_question(1, crate::state::StepKind::Plan, vec![]).await
        });
        tokio::task::yield_now().await;
        assert_eq!(broker.get_pending().len(), 1);

        let manager = ShutdownManager::new(facade, broker.clone(), server, log, notifications);
        // Exercise the teardown steps directly without hitting process::exit.
        manager.broker.reject_all("shutting down");
        manager.server.close().await;
        manager.log.flush().unwrap();
        manager.notifications.close().await;

        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, crate::broker::BrokerOutcome::Rejected { .. }));
        assert!(broker.get_pending().is_empty());
    }
}
