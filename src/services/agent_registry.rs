use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::services::agent::AiAgent;

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, Arc<dyn AiAgent>>,
    pending: HashSet<String>,
}

/// Live agents keyed by bot user id, plus the ids whose start is in flight.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    state: Arc<Mutex<RegistryState>>,
}

/// Marks a start as in flight; the mark is released on drop.
pub struct PendingGuard {
    registry: AgentRegistry,
    user_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.release(&self.user_id);
    }
}

fn same_agent(a: &Arc<dyn AiAgent>, b: &Arc<dyn AiAgent>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<dyn AiAgent>> {
        self.state.lock().agents.get(user_id).cloned()
    }

    pub fn has(&self, user_id: &str) -> bool {
        self.state.lock().agents.contains_key(user_id)
    }

    pub fn set(&self, user_id: &str, agent: Arc<dyn AiAgent>) {
        self.state.lock().agents.insert(user_id.to_string(), agent);
    }

    pub fn delete(&self, user_id: &str) -> Option<Arc<dyn AiAgent>> {
        self.state.lock().agents.remove(user_id)
    }

    /// Removes the entry only if it still holds `agent`.
    pub fn delete_if(&self, user_id: &str, agent: &Arc<dyn AiAgent>) -> bool {
        let mut state = self.state.lock();
        match state.agents.get(user_id) {
            Some(current) if same_agent(current, agent) => {
                state.agents.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, user_id: &str) -> bool {
        self.state.lock().pending.contains(user_id)
    }

    /// Atomically checks both sets and marks `user_id` pending. `None` when
    /// the agent already exists or another start holds the mark.
    pub fn try_reserve(&self, user_id: &str) -> Option<PendingGuard> {
        let mut state = self.state.lock();
        if state.agents.contains_key(user_id) || state.pending.contains(user_id) {
            return None;
        }
        state.pending.insert(user_id.to_string());
        Some(PendingGuard {
            registry: self.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn release(&self, user_id: &str) {
        self.state.lock().pending.remove(user_id);
    }

    pub fn len(&self) -> usize {
        self.state.lock().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(String, Arc<dyn AiAgent>)> {
        self.state
            .lock()
            .agents
            .iter()
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect()
    }

    pub fn drain(&self) -> Vec<Arc<dyn AiAgent>> {
        self.state.lock().agents.drain().map(|(_, agent)| agent).collect()
    }
}
