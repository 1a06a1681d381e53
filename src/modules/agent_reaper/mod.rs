pub mod types;
mod worker;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::agent_controller::AgentController;

pub use types::ReaperSettings;

/// Spawns the periodic idle-agent sweep. Cancel `shutdown` and await the
/// handle to stop it after any running sweep has finished.
pub fn start_background(
    controller: AgentController,
    settings: ReaperSettings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    worker::start_worker(controller, settings, shutdown)
}
