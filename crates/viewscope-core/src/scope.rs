//! Scopes as seen by the DI container
//!
//! A DI container resolves scoped beans through the [`Scope`] trait and
//! registers scope implementations by name in a [`ScopeRegistry`].
//! [`UiScope`] keeps beans for the lifetime of one UI.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::bean_store::{downcast_bean, Bean, DestructionCallback};
use crate::context::ScopeContext;
use crate::error::{BoxError, ScopeError, ScopeResult};
use crate::locking::SessionLockingBeanStore;
use crate::retrieval::{BeanStoreRetrievalStrategy, SessionBeanStoreRetrievalStrategy};
use crate::settings::ScopeSettings;

/// Factory the DI container supplies for lazy bean creation
pub type BeanFactory<'a> = Box<dyn FnOnce() -> Result<Bean, BoxError> + 'a>;

/// A bean scope the DI container delegates to
pub trait Scope: Send + Sync {
    /// Return the bean `name` of the current scope, creating it with `factory` if absent
    fn get(&self, ctx: &ScopeContext, name: &str, factory: BeanFactory<'_>) -> ScopeResult<Bean>;

    /// Evict the bean `name` from the current scope
    fn remove(&self, ctx: &ScopeContext, name: &str) -> ScopeResult<Option<Bean>>;

    /// Run `callback` when the current scope ends
    fn register_destruction_callback(
        &self,
        ctx: &ScopeContext,
        name: &str,
        callback: DestructionCallback,
    ) -> ScopeResult<()>;

    /// Contextual objects are not supported by these scopes
    fn resolve_contextual_object(&self, _ctx: &ScopeContext, _key: &str) -> Option<Bean> {
        None
    }

    /// Identifier of the current scope instance
    fn conversation_id(&self, ctx: &ScopeContext) -> ScopeResult<String>;
}

impl dyn Scope {
    /// Typed variant of [`Scope::get`]
    pub fn get_or_create<T, F>(&self, ctx: &ScopeContext, name: &str, factory: F) -> ScopeResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let bean = self.get(ctx, name, Box::new(move || Ok(Arc::new(factory()) as Bean)))?;
        downcast_bean(name, bean)
    }
}

/// Beans living as long as the UI they were created for
pub struct UiScope {
    strategy: RwLock<Arc<dyn BeanStoreRetrievalStrategy>>,
    settings: ScopeSettings,
}

impl UiScope {
    /// Name under which the scope is registered
    pub const NAME: &'static str = "ui";

    pub fn new() -> Self {
        Self::with_settings(ScopeSettings::default())
    }

    pub fn with_settings(settings: ScopeSettings) -> Self {
        let strategy = Arc::new(SessionBeanStoreRetrievalStrategy::with_settings(settings.clone()));
        Self {
            strategy: RwLock::new(strategy),
            settings,
        }
    }

    pub fn with_strategy(strategy: Arc<dyn BeanStoreRetrievalStrategy>) -> Self {
        Self {
            strategy: RwLock::new(strategy),
            settings: ScopeSettings::default(),
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

    /// The store of the UI bound to `ctx`
    pub fn bean_store(&self, ctx: &ScopeContext) -> ScopeResult<SessionLockingBeanStore> {
        self.retrieval_strategy().bean_store(ctx)
    }
}

impl Default for UiScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for UiScope {
    fn get(&self, ctx: &ScopeContext, name: &str, factory: BeanFactory<'_>) -> ScopeResult<Bean> {
        trace!(bean = name, "Getting bean from UI scope");
        self.bean_store(ctx)?.get(name, factory)
    }

    fn remove(&self, ctx: &ScopeContext, name: &str) -> ScopeResult<Option<Bean>> {
        trace!(bean = name, "Removing bean from UI scope");
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
        self.retrieval_strategy().conversation_id(ctx)
    }
}

/// Named scopes known to the DI container
#[derive(Default)]
pub struct ScopeRegistry {
    scopes: RwLock<HashMap<String, Arc<dyn Scope>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `scope` under `name`
    pub fn register_scope(&self, name: &str, scope: Arc<dyn Scope>) -> ScopeResult<()> {
        let mut scopes = self.scopes.write();
        if scopes.contains_key(name) {
            return Err(ScopeError::ScopeAlreadyRegistered(name.to_string()));
        }
        scopes.insert(name.to_string(), scope);
        debug!(scope = name, "Registered scope");
        Ok(())
    }

    /// Look up the scope registered under `name`
    pub fn scope(&self, name: &str) -> ScopeResult<Arc<dyn Scope>> {
        self.scopes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ScopeError::ScopeNotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.scopes.read().contains_key(name)
    }

    /// Registered scope names, sorted
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.read().keys().cloned().collect();
        names.sort();
        names
    }
}
