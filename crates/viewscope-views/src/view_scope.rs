//! The view scope
//!
//! Beans of the view scope live in the store of the current view of the
//! current UI. Each UI gets a [`ViewCache`], kept as a bean of the UI's own
//! store, so tearing down the UI tears down its views with it.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};
use viewscope_core::{
    downcast_bean, Bean, BeanFactory, BeanStoreRetrievalStrategy, DestructionCallback, Scope, ScopeContext,
    ScopeError, ScopeResult, ScopeSettings, Session, SessionBeanStoreRetrievalStrategy, SessionLockingBeanStore,
};

use crate::view_cache::ViewCache;

/// Bean name of the per-UI [`ViewCache`] in the UI store
pub const VIEW_CACHE_BEAN: &str = "viewscope.viewCache";

/// Beans living as long as the view they were created for
pub struct ViewScope {
    strategy: RwLock<Arc<dyn BeanStoreRetrievalStrategy>>,
    settings: ScopeSettings,
}

impl ViewScope {
    /// Name under which the scope is registered
    pub const NAME: &'static str = "view";

    pub fn new() -> Self {
        Self::with_settings(ScopeSettings::default())
    }

    pub fn with_settings(settings: ScopeSettings) -> Self {
        let strategy = Arc::new(SessionBeanStoreRetrievalStrategy::with_settings(settings.clone()));
        Self::with_strategy(strategy, settings)
    }

    pub fn with_strategy(strategy: Arc<dyn BeanStoreRetrievalStrategy>, settings: ScopeSettings) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            settings,
        }
    }

    pub fn retrieval_strategy(&self) -> Arc<dyn BeanStoreRetrievalStrategy> {
        Arc::clone(&self.strategy.read())
    }

    /// Replace the retrieval strategy; `None` restores the default one
    pub fn set_retrieval_strategy(&self, strategy: Option<Arc<dyn BeanStoreRetrievalStrategy>>) {
        let strategy = strategy.unwrap_or_else(|| {
            Arc::new(SessionBeanStoreRetrievalStrategy::with_settings(self.settings.clone()))
        });
        *self.strategy.write() = strategy;
    }

    /// The view cache of the UI bound to `ctx`, created on first use
    pub fn view_cache(&self, ctx: &ScopeContext) -> ScopeResult<Arc<ViewCache>> {
        self.resolve(ctx).map(|(_, cache)| cache)
    }

    /// The view cache of the UI bound to `ctx` if one was created already
    pub fn existing_view_cache(&self, ctx: &ScopeContext) -> ScopeResult<Option<Arc<ViewCache>>> {
        let Some(ui_store) = self.retrieval_strategy().find_bean_store(ctx)? else {
            return Ok(None);
        };
        match ui_store.find(VIEW_CACHE_BEAN)? {
            Some(bean) => downcast_bean(VIEW_CACHE_BEAN, bean).map(Some),
            None => Ok(None),
        }
    }

    /// Store of the current view of the UI bound to `ctx`
    ///
    /// # Errors
    /// `NoActiveView` if the UI is neither constructing nor showing a view,
    /// plus every error of the retrieval strategy.
    pub fn bean_store(&self, ctx: &ScopeContext) -> ScopeResult<SessionLockingBeanStore> {
        let (session, cache) = self.resolve(ctx)?;
        let store = {
            let guard = session.lock_open()?;
            cache.current_view_bean_store(&guard)?
        };
        Ok(SessionLockingBeanStore::new(session, store))
    }

    /// Construct the view `view_name` with `construct`, tracking its store
    ///
    /// View scoped beans resolved while `construct` runs go to the new view's
    /// store. `construct` returning `None` marks the construction as failed
    /// and the store is destroyed.
    pub fn construct_view<V, F>(&self, ctx: &ScopeContext, view_name: &str, construct: F) -> ScopeResult<Option<V>>
    where
        V: Any,
        F: FnOnce() -> Option<V>,
    {
        let (session, cache) = self.resolve(ctx)?;
        let guard = session.lock_open()?;
        cache.creating_view(&guard, view_name)?;
        let view = construct();
        cache.view_created(&guard, view_name, view.as_ref().map(|view| view as &dyn Any))?;
        Ok(view)
    }

    /// Get the UI store from the strategy and the view cache from the UI store
    fn resolve(&self, ctx: &ScopeContext) -> ScopeResult<(Arc<Session>, Arc<ViewCache>)> {
        let ui_store = self.retrieval_strategy().bean_store(ctx)?;
        let ui = ctx.require_ui()?.clone();
        let session = Arc::clone(ui_store.session());
        let cache = {
            let _guard = session.lock_open()?;
            let mut created = false;
            let bean = ui_store.get(VIEW_CACHE_BEAN, || {
                created = true;
                Ok(ViewCache::new(&session, ui, &self.settings) as Bean)
            })?;
            let cache: Arc<ViewCache> = downcast_bean(VIEW_CACHE_BEAN, bean)?;

            if created {
                debug!(ui = %cache.ui().id(), session = %session.id(), "Created view cache");
                let on_destroy = Arc::clone(&cache);
                let owner: Weak<Session> = Arc::downgrade(&session);
                ui_store.register_destruction_callback(
                    VIEW_CACHE_BEAN,
                    DestructionCallback::fallible(move || {
                        let Some(session) = owner.upgrade() else {
                            warn!(ui = %on_destroy.ui().id(), "Session gone before its view cache was destroyed");
                            return Ok(());
                        };
                        let guard = session.lock();
                        on_destroy.destroy(&guard)?;
                        Ok(())
                    }),
                )?;
            }
            cache
        };
        Ok((session, cache))
    }
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for ViewScope {
    fn get(&self, ctx: &ScopeContext, name: &str, factory: BeanFactory<'_>) -> ScopeResult<Bean> {
        trace!(bean = name, "Getting bean from view scope");
        self.bean_store(ctx)?.get(name, factory)
    }

    fn remove(&self, ctx: &ScopeContext, name: &str) -> ScopeResult<Option<Bean>> {
        trace!(bean = name, "Removing bean from view scope");
        self.bean_store(ctx)?.remove(name)
    }

    fn register_destruction_callback(
        &self,
        ctx: &ScopeContext,
        name: &str,
        callback: DestructionCallback,
    ) -> ScopeResult<()> {
        self.bean_store(ctx)?.register_destruction_callback(name, callback)
    }

    fn conversation_id(&self, ctx: &ScopeContext) -> ScopeResult<String> {
        let ui_conversation = self.retrieval_strategy().conversation_id(ctx)?;
        let view = self
            .existing_view_cache(ctx)?
            .and_then(|cache| cache.current_view())
            .ok_or(ScopeError::NoActiveView)?;
        Ok(self.settings.conversation_id(&[&ui_conversation, &view]))
    }
}
