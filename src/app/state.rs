use super::{CloudcamOrchestrator, ComponentState};
use std::collections::HashMap;
use tracing::debug;

impl CloudcamOrchestrator {
    /// Register components as stopped, replacing any earlier state
    pub(super) async fn register_components(&self, components: &[&str]) {
        let mut states = self.component_states.lock().await;
        states.clear();
        for component in components {
            states.insert(component.to_string(), ComponentState::Stopped);
        }
    }

    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let previous = self
            .component_states
            .lock()
            .await
            .insert(component.to_string(), state.clone());
        match previous {
            Some(previous) => debug!("Component '{}': {:?} -> {:?}", component, previous, state),
            None => debug!("Component '{}' registered as {:?}", component, state),
        }
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// Names of components that failed to start or stop, sorted
    pub async fn failed_components(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .component_states
            .lock()
            .await
            .iter()
            .filter(|(_, state)| **state == ComponentState::Failed)
            .map(|(name, _)| name.clone())
            .collect();
        failed.sort();
        failed
    }

    /// True when every registered component is running
    pub async fn is_running(&self) -> bool {
        let states = self.component_states.lock().await;
        !states.is_empty() && states.values().all(|state| *state == ComponentState::Running)
    }
}
