//! Scope keys
//!
//! A store is named by the UI it belongs to and, for view scoped stores, the
//! view name. The rendered key doubles as the store name in logs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one UI instance within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UiId(u32);

impl UiId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for UiId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for UiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key naming exactly one bean store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    ui: UiId,
    view: Option<String>,
}

impl ScopeKey {
    /// Key of the UI scoped store of `ui`
    pub fn ui(ui: UiId) -> Self {
        Self { ui, view: None }
    }

    /// Key of the view scoped store of `view` within `ui`
    pub fn view(ui: UiId, view: impl Into<String>) -> Self {
        Self {
            ui,
            view: Some(view.into()),
        }
    }

    pub fn ui_id(&self) -> UiId {
        self.ui
    }

    pub fn view_name(&self) -> Option<&str> {
        self.view.as_deref()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.view {
            Some(view) => write!(f, "{}:{}", self.ui, view),
            None => write!(f, "{}", self.ui),
        }
    }
}
