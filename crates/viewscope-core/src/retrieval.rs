//! Bean store retrieval strategies
//!
//! A strategy resolves "the store of the current UI" from the request's
//! [`ScopeContext`]. The default strategy keeps one [`UiStore`] per session
//! as a session attribute and hands out the identical store for repeated
//! calls within the same session and UI.

use std::sync::Arc;

use tracing::trace;

use crate::context::ScopeContext;
use crate::error::ScopeResult;
use crate::locking::SessionLockingBeanStore;
use crate::registry::UiStore;
use crate::session::{Session, SessionGuard};
use crate::settings::ScopeSettings;

/// Resolves the current UI store and conversation id from a context
pub trait BeanStoreRetrievalStrategy: Send + Sync {
    /// The bean store of the UI bound to `ctx`
    fn bean_store(&self, ctx: &ScopeContext) -> ScopeResult<SessionLockingBeanStore>;

    /// The bean store of the UI bound to `ctx` if it already exists
    ///
    /// Meant for read-only queries that must not allocate scope state.
    /// Strategies without such a lookup fall back to
    /// [`bean_store`](Self::bean_store).
    fn find_bean_store(&self, ctx: &ScopeContext) -> ScopeResult<Option<SessionLockingBeanStore>> {
        self.bean_store(ctx).map(Some)
    }

    /// Identifier of the current conversation, unique per session and UI
    fn conversation_id(&self, ctx: &ScopeContext) -> ScopeResult<String>;
}

/// Default strategy backed by a per-session [`UiStore`] attribute
#[derive(Debug, Clone, Default)]
pub struct SessionBeanStoreRetrievalStrategy {
    settings: ScopeSettings,
}

impl SessionBeanStoreRetrievalStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ScopeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScopeSettings {
        &self.settings
    }

    /// The UI store of the session bound to `ctx`
    pub fn ui_store(&self, ctx: &ScopeContext) -> ScopeResult<Arc<UiStore>> {
        let session = ctx.require_open_session()?;
        let guard = session.lock_open()?;
        self.ui_store_locked(session, &guard)
    }

    /// Get or create the session's UI store; the store is destroyed when the
    /// session closes
    fn ui_store_locked(&self, session: &Session, guard: &SessionGuard<'_>) -> ScopeResult<Arc<UiStore>> {
        session.get_or_init_attribute(guard, |guard| {
            let ui_store = Arc::new(UiStore::new(session.owner().clone(), &self.settings));
            let on_close = Arc::clone(&ui_store);
            session.add_destroy_listener(guard, move |guard| on_close.destroy(guard))?;
            Ok(ui_store)
        })
    }
}

impl BeanStoreRetrievalStrategy for SessionBeanStoreRetrievalStrategy {
    fn bean_store(&self, ctx: &ScopeContext) -> ScopeResult<SessionLockingBeanStore> {
        let session = ctx.require_open_session()?;
        let ui = ctx.require_ui()?;

        let guard = session.lock_open()?;
        let ui_store = self.ui_store_locked(session, &guard)?;
        let store = ui_store.get_bean_store(&guard, ui.id())?;
        trace!(session = %session.id(), ui = %ui.id(), store = store.name(), "Resolved UI bean store");
        Ok(SessionLockingBeanStore::new(Arc::clone(session), store))
    }

    fn find_bean_store(&self, ctx: &ScopeContext) -> ScopeResult<Option<SessionLockingBeanStore>> {
        let session = ctx.require_open_session()?;
        let ui = ctx.require_ui()?;

        let guard = session.lock_open()?;
        let Some(ui_store) = session.attribute::<UiStore>(&guard)? else {
            return Ok(None);
        };
        let store = ui_store.find_bean_store(&guard, ui.id())?;
        Ok(store.map(|store| SessionLockingBeanStore::new(Arc::clone(session), store)))
    }

    fn conversation_id(&self, ctx: &ScopeContext) -> ScopeResult<String> {
        let session = ctx.require_open_session()?;
        let ui = ctx.require_ui()?;
        Ok(self.settings.conversation_id(&[session.id(), &ui.id()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Ui;
    use crate::error::ScopeError;
    use crate::key::UiId;

    const TEST_SESSION_ID: &str = "TestSessionID";
    const TEST_UI_ID: u32 = 123;

    fn open_context() -> (Arc<Session>, ScopeContext) {
        let session = Arc::new(Session::new(TEST_SESSION_ID));
        let ctx = ScopeContext::for_request(Arc::clone(&session), Ui::new(UiId::new(TEST_UI_ID)));
        (session, ctx)
    }

    #[test]
    fn test_no_session_fails() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let err = strategy.bean_store(&ScopeContext::new()).unwrap_err();
        assert!(matches!(err, ScopeError::NoSession));
        assert_eq!(err.to_string(), "No session bound to current context");
    }

    #[test]
    fn test_closed_session_fails() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (session, ctx) = open_context();
        session.close().unwrap();

        assert!(matches!(
            strategy.bean_store(&ctx),
            Err(ScopeError::SessionNotOpen(_))
        ));
    }

    #[test]
    fn test_session_closed_while_waiting_for_lock_fails() {
        let strategy = Arc::new(SessionBeanStoreRetrievalStrategy::new());
        let (session, ctx) = open_context();
        let held = session.lock();

        let waiting = {
            let strategy = Arc::clone(&strategy);
            let ctx = ctx.clone();
            std::thread::spawn(move || strategy.bean_store(&ctx).map(|store| store.name().to_string()))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        session.close().unwrap();
        drop(held);

        let result = waiting.join().unwrap();
        assert!(matches!(result, Err(ScopeError::SessionNotOpen(_))));
        let guard = session.lock();
        assert!(session.attribute::<UiStore>(&guard).unwrap().is_none());
    }

    #[test]
    fn test_find_does_not_create_stores() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (session, ctx) = open_context();

        assert!(strategy.find_bean_store(&ctx).unwrap().is_none());
        {
            let guard = session.lock();
            assert!(session.attribute::<UiStore>(&guard).unwrap().is_none());
        }

        let created = strategy.bean_store(&ctx).unwrap();
        let found = strategy.find_bean_store(&ctx).unwrap().unwrap();
        assert!(created.same_store(&found));
    }

    #[test]
    fn test_missing_ui_fails() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let ctx = ScopeContext::new().with_session(Arc::new(Session::new("s")));
        assert!(matches!(strategy.bean_store(&ctx), Err(ScopeError::NoUi)));
    }

    #[test]
    fn test_same_store_on_repeated_calls() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (_session, ctx) = open_context();

        let first = strategy.bean_store(&ctx).unwrap();
        let second = strategy.bean_store(&ctx).unwrap();

        assert!(first.same_store(&second));
        assert!(Arc::ptr_eq(&strategy.ui_store(&ctx).unwrap(), &strategy.ui_store(&ctx).unwrap()));
    }

    #[test]
    fn test_different_ui_gets_different_store() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (session, ctx) = open_context();
        let other_ctx = ScopeContext::for_request(session, Ui::new(UiId::new(TEST_UI_ID + 1)));

        let first = strategy.bean_store(&ctx).unwrap();
        let other = strategy.bean_store(&other_ctx).unwrap();
        assert!(!first.same_store(&other));
    }

    #[test]
    fn test_conversation_id_contains_session_and_ui() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (_session, ctx) = open_context();

        let id = strategy.conversation_id(&ctx).unwrap();
        assert!(id.contains(TEST_SESSION_ID));
        assert!(id.contains(&TEST_UI_ID.to_string()));
        assert_eq!(id, "TestSessionID:123");
    }

    #[test]
    fn test_session_close_destroys_ui_stores() {
        let strategy = SessionBeanStoreRetrievalStrategy::new();
        let (session, ctx) = open_context();
        let store = strategy.bean_store(&ctx).unwrap();
        store.get_or_create("bean", || 1u8).unwrap();

        session.close().unwrap();
        assert!(store.store().is_destroyed());
    }
}
