//! Scope behaviour settings

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Tunables for registries and retrieval strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    /// Report a registry that is not empty after teardown as an error
    /// (otherwise only a warning is logged)
    pub verify_teardown: bool,

    /// Separator between the components of a conversation id
    pub conversation_separator: String,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            verify_teardown: true,
            conversation_separator: ":".to_string(),
        }
    }
}

impl ScopeSettings {
    /// Join conversation id components with the configured separator
    pub fn conversation_id(&self, parts: &[&dyn Display]) -> String {
        parts
            .iter()
            .map(|part| part.to_string())
            .collect::<Vec<_>>()
            .join(&self.conversation_separator)
    }
}
