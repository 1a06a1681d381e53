use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::time::now_millis;
use crate::services::agent_controller::AgentController;

use super::types::ReaperSettings;

struct SweepRunningGuard {
    running: Arc<AtomicBool>,
}

impl Drop for SweepRunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Ticks until `shutdown` fires, then waits for the sweep in flight.
pub fn start_worker(
    controller: AgentController,
    settings: ReaperSettings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "[AGENT-REAPER] starting background worker, sweep_interval={}s, inactivity_threshold={}s",
        settings.sweep_interval.as_secs(),
        settings.inactivity_threshold.as_secs()
    );

    tokio::spawn(async move {
        let running = Arc::new(AtomicBool::new(false));
        let mut ticker = time::interval(settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if running.swap(true, Ordering::AcqRel) {
                debug!("[AGENT-REAPER] previous sweep still running, skip this tick");
                continue;
            }

            let controller = controller.clone();
            let running_clone = Arc::clone(&running);
            let threshold = settings.inactivity_threshold;
            in_flight = Some(tokio::spawn(async move {
                let _guard = SweepRunningGuard {
                    running: running_clone,
                };
                run_once(&controller, threshold).await;
            }));
        }

        if let Some(sweep) = in_flight {
            if let Err(err) = sweep.await {
                warn!("[AGENT-REAPER] sweep task failed during shutdown: {}", err);
            }
        }
        info!("[AGENT-REAPER] stopped");
    })
}

async fn run_once(controller: &AgentController, threshold: std::time::Duration) {
    let removed = controller.sweep_idle(now_millis(), threshold).await;
    if !removed.is_empty() {
        info!(
            "[AGENT-REAPER] disposed {} idle agents: {}",
            removed.len(),
            removed.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::services::agent::AiAgent;
    use crate::services::agent_registry::AgentRegistry;
    use crate::services::testing::{FakeChat, FakeFactory};

    #[tokio::test]
    async fn worker_removes_idle_agents_on_tick() {
        let factory = Arc::new(FakeFactory::default());
        let controller = AgentController::new(
            AgentRegistry::new(),
            Arc::new(FakeChat::default()),
            factory.clone(),
        );
        controller.start("idle", None).await.unwrap();
        controller.start("busy", None).await.unwrap();
        for agent in factory.created() {
            if agent.user_id() == "ai-bot-idle" {
                agent.set_last_interaction(now_millis() - 120_000);
            }
        }

        let shutdown = CancellationToken::new();
        let handle = start_worker(
            controller.clone(),
            ReaperSettings {
                sweep_interval: Duration::from_millis(10),
                inactivity_threshold: Duration::from_secs(60),
            },
            shutdown.clone(),
        );

        for _ in 0..100 {
            if !controller.registry().has("ai-bot-idle") {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(!controller.registry().has("ai-bot-idle"));
        assert!(controller.registry().has("ai-bot-busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_sweep_in_flight() {
        let factory = Arc::new(FakeFactory::with_dispose_delay(Duration::from_secs(5)));
        let controller = AgentController::new(
            AgentRegistry::new(),
            Arc::new(FakeChat::default()),
            factory.clone(),
        );
        controller.start("idle", None).await.unwrap();
        factory.created()[0].set_last_interaction(0);

        let shutdown = CancellationToken::new();
        let handle = start_worker(
            controller.clone(),
            ReaperSettings {
                sweep_interval: Duration::from_secs(60),
                inactivity_threshold: Duration::from_secs(60),
            },
            shutdown.clone(),
        );
        for _ in 0..10 {
            if !controller.registry().has("ai-bot-idle") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!controller.registry().has("ai-bot-idle"));
        assert_eq!(factory.created()[0].dispose_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(factory.created()[0].dispose_count(), 1);
    }
}
