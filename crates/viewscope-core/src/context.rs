//! Per-request scope context
//!
//! The request-handling layer builds a [`ScopeContext`] for each request and
//! passes it to every scope operation. The core only reads it.

use std::fmt;
use std::sync::Arc;

use crate::error::{ScopeError, ScopeResult};
use crate::key::UiId;
use crate::navigator::Navigator;
use crate::session::Session;

/// The UI a request is served for
#[derive(Clone)]
pub struct Ui {
    id: UiId,
    navigator: Option<Arc<dyn Navigator>>,
}

impl Ui {
    pub fn new(id: UiId) -> Self {
        Self {
            id,
            navigator: None,
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn id(&self) -> UiId {
        self.id
    }

    pub fn navigator(&self) -> Option<&Arc<dyn Navigator>> {
        self.navigator.as_ref()
    }
}

impl fmt::Debug for Ui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ui")
            .field("id", &self.id)
            .field("navigator", &self.navigator.is_some())
            .finish()
    }
}

/// Session and UI bound to the current request
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    session: Option<Arc<Session>>,
    ui: Option<Ui>,
}

impl ScopeContext {
    /// Empty context: no session, no UI
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_request(session: Arc<Session>, ui: Ui) -> Self {
        Self {
            session: Some(session),
            ui: Some(ui),
        }
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_ui(mut self, ui: Ui) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn ui(&self) -> Option<&Ui> {
        self.ui.as_ref()
    }

    /// The bound session, which must be open
    ///
    /// # Errors
    /// - `NoSession` if no session is bound
    /// - `SessionNotOpen` if the session is closing or closed
    ///
    /// The session may close right after this returns; code about to touch
    /// session state takes the lock with [`Session::lock_open`].
    pub fn require_open_session(&self) -> ScopeResult<&Arc<Session>> {
        let session = self.session.as_ref().ok_or(ScopeError::NoSession)?;
        if !session.is_open() {
            return Err(ScopeError::SessionNotOpen(session.id().clone()));
        }
        Ok(session)
    }

    /// The bound UI
    pub fn require_ui(&self) -> ScopeResult<&Ui> {
        self.ui.as_ref().ok_or(ScopeError::NoUi)
    }
}
