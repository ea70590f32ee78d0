//! Adapter configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the component adapter.
///
/// Missing fields deserialize to their defaults, so embedders can ship
/// partial configs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Polls a generator body gets after its channel is closed to observe
    /// termination and return. A body still running afterwards is dropped.
    /// Async generators winding down are instead allowed this many yields.
    pub teardown_poll_budget: u32,
    /// Treat pulling the next input twice without yielding in between as a
    /// body error. When off, the second pull simply waits for input.
    pub strict_iteration: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            teardown_poll_budget: 1,
            strict_iteration: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: AdapterConfig = serde_json::from_str(r#"{ "strict_iteration": false }"#).unwrap();
        assert!(!config.strict_iteration);
        assert_eq!(config.teardown_poll_budget, 1);
    }
}
