//! Scope Error Types
//!
//! Every failure here is a lifecycle or programming error reported to the
//! caller synchronously. Nothing is retried.

use thiserror::Error;

use crate::key::UiId;
use crate::session::SessionId;

/// Boxed error returned by bean factories and destruction callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while resolving or tearing down scoped stores
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The context carries no session
    #[error("No session bound to current context")]
    NoSession,

    /// The session is closing or closed
    #[error("Current session {0} is not open")]
    SessionNotOpen(SessionId),

    /// The context carries no UI
    #[error("No UI bound to current context")]
    NoUi,

    /// View scoped stores need a navigator to follow view changes
    #[error("UI {0} has no navigator")]
    NoNavigator(UiId),

    /// Neither a view under construction nor an active view exists
    #[error("No active view")]
    NoActiveView,

    /// A view store was requested before the view was created
    #[error("The view {0} has not been created")]
    ViewNotCreated(String),

    /// The bean store was used after it was destroyed
    #[error("Bean store {0} has been destroyed")]
    StoreDestroyed(String),

    /// The supplied lock token belongs to another session
    #[error("Session lock for {expected} is not held (got guard for {actual})")]
    LockNotHeld {
        expected: SessionId,
        actual: SessionId,
    },

    /// The bean factory failed; nothing was stored
    #[error("Failed to create bean {bean} in store {store}: {source}")]
    BeanCreation {
        store: String,
        bean: String,
        #[source]
        source: BoxError,
    },

    /// A stored bean does not have the requested type
    #[error("Bean {bean} is not of type {expected}")]
    TypeMismatch { bean: String, expected: &'static str },

    /// At least one destruction callback failed; all of them were attempted
    #[error("{failures} destruction callback(s) failed in store {store}, first: {source}")]
    DestructionFailed {
        store: String,
        failures: usize,
        #[source]
        source: BoxError,
    },

    /// Destruction hooks did not empty the registry
    #[error("Registry {registry} still holds {remaining} store(s) after teardown")]
    TeardownInvariant { registry: String, remaining: usize },

    /// A scope with this name is already registered
    #[error("Scope already registered: {0}")]
    ScopeAlreadyRegistered(String),

    /// No scope with this name is registered
    #[error("Scope not registered: {0}")]
    ScopeNotRegistered(String),
}

impl ScopeError {
    /// Create a bean creation error
    pub fn bean_creation<S, B>(store: S, bean: B, source: BoxError) -> Self
    where
        S: Into<String>,
        B: Into<String>,
    {
        Self::BeanCreation {
            store: store.into(),
            bean: bean.into(),
            source,
        }
    }

    /// Whether this error reports a missing or unusable ambient scope
    /// (as opposed to a failure inside user code)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoSession
                | Self::SessionNotOpen(_)
                | Self::NoUi
                | Self::NoNavigator(_)
                | Self::NoActiveView
                | Self::ViewNotCreated(_)
                | Self::StoreDestroyed(_)
                | Self::LockNotHeld { .. }
                | Self::TeardownInvariant { .. }
        )
    }
}

/// Result alias for scope operations
pub type ScopeResult<T> = Result<T, ScopeError>;
