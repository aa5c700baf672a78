//! Navigation event source
//!
//! The core never navigates by itself. It subscribes listeners to whatever
//! [`Navigator`] the UI carries and reacts to the events it delivers.
//! [`SimpleNavigator`] is a minimal in-process implementation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

/// A navigation from one view to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChangeEvent {
    old_view: Option<String>,
    view_name: String,
    parameters: String,
}

impl ViewChangeEvent {
    pub fn new(old_view: Option<String>, view_name: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self {
            old_view,
            view_name: view_name.into(),
            parameters: parameters.into(),
        }
    }

    /// Name of the view being navigated to
    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    pub fn old_view(&self) -> Option<&str> {
        self.old_view.as_deref()
    }

    pub fn parameters(&self) -> &str {
        &self.parameters
    }
}

/// Receives navigation notifications
pub trait ViewChangeListener: Send + Sync {
    /// Return `false` to veto the navigation
    fn before_view_change(&self, _event: &ViewChangeEvent) -> bool {
        true
    }

    /// Called once the navigation has been committed
    fn after_view_change(&self, event: &ViewChangeEvent);
}

/// Handle returned on subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Subscribe/unsubscribe surface of a navigation source
pub trait Navigator: Send + Sync {
    fn add_view_change_listener(&self, listener: Arc<dyn ViewChangeListener>) -> ListenerId;

    /// Returns whether the listener was subscribed
    fn remove_view_change_listener(&self, id: ListenerId) -> bool;
}

/// In-process navigator dispatching to a snapshot of its listeners
///
/// Listeners may unsubscribe (or subscribe others) while an event is being
/// delivered; the change takes effect from the next navigation.
#[derive(Default)]
pub struct SimpleNavigator {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ViewChangeListener>)>>,
    next_id: AtomicU64,
    current: RwLock<Option<String>>,
}

impl SimpleNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Navigate to `view_name`
    ///
    /// Returns `false` if a listener vetoed the change, in which case no
    /// `after_view_change` notification is sent.
    pub fn navigate_to(&self, view_name: &str) -> bool {
        self.navigate_with_parameters(view_name, "")
    }

    pub fn navigate_with_parameters(&self, view_name: &str, parameters: &str) -> bool {
        let event = ViewChangeEvent::new(self.current_view(), view_name, parameters);
        let listeners: Vec<Arc<dyn ViewChangeListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        if !listeners.iter().all(|listener| listener.before_view_change(&event)) {
            debug!(view = view_name, "Navigation vetoed");
            return false;
        }

        *self.current.write() = Some(view_name.to_string());
        trace!(view = view_name, listeners = listeners.len(), "Dispatching view change");
        for listener in &listeners {
            listener.after_view_change(&event);
        }
        true
    }

    pub fn current_view(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Navigator for SimpleNavigator {
    fn add_view_change_listener(&self, listener: Arc<dyn ViewChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_view_change_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(current, _)| *current != id);
        listeners.len() != before
    }
}

impl fmt::Debug for SimpleNavigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleNavigator")
            .field("current", &self.current_view())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
