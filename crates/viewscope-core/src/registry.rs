//! Scoped store registries
//!
//! A registry owns the bean stores of one session-like scope and guarantees
//! at most one live store per key. Entries are only ever removed by the
//! store's own destruction hook, so a store destroyed from anywhere
//! deregisters itself.
//!
//! Callers must hold the owning session's lock. Every mutating operation
//! takes the [`SessionGuard`] as proof and rejects guards of other sessions;
//! the registry adds no locking of its own beyond guarding its map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::bean_store::BeanStore;
use crate::error::{ScopeError, ScopeResult};
use crate::key::{ScopeKey, UiId};
use crate::session::{SessionGuard, SessionOwner};
use crate::settings::ScopeSettings;

type StoreMap = HashMap<ScopeKey, Arc<BeanStore>>;

/// Registry of bean stores keyed by [`ScopeKey`]
pub struct StoreRegistry {
    name: String,
    owner: SessionOwner,
    stores: Arc<Mutex<StoreMap>>,
    verify_teardown: bool,
}

impl StoreRegistry {
    /// Create an empty registry owned by the session instance `owner`
    pub fn new(name: impl Into<String>, owner: SessionOwner) -> Self {
        Self::with_settings(name, owner, &ScopeSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, owner: SessionOwner, settings: &ScopeSettings) -> Self {
        Self {
            name: name.into(),
            owner,
            stores: Arc::new(Mutex::new(HashMap::new())),
            verify_teardown: settings.verify_teardown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &SessionOwner {
        &self.owner
    }

    /// Return the store for `key`, creating and registering it if absent
    pub fn get_bean_store(&self, guard: &SessionGuard<'_>, key: &ScopeKey) -> ScopeResult<Arc<BeanStore>> {
        self.get_or_create_with(guard, key, |_| Ok(()))
    }

    /// Like [`get_bean_store`](Self::get_bean_store), running `init` on a
    /// freshly created store before it is registered
    ///
    /// If `init` fails the new store is dropped unregistered and the error
    /// is returned.
    pub fn get_or_create_with<F>(
        &self,
        guard: &SessionGuard<'_>,
        key: &ScopeKey,
        init: F,
    ) -> ScopeResult<Arc<BeanStore>>
    where
        F: FnOnce(&Arc<BeanStore>) -> ScopeResult<()>,
    {
        guard.verify(&self.owner)?;
        if let Some(existing) = self.stores.lock().get(key) {
            return Ok(Arc::clone(existing));
        }

        let store = Arc::new(BeanStore::new(key.to_string()));
        let stores: Weak<Mutex<StoreMap>> = Arc::downgrade(&self.stores);
        let hook_key = key.clone();
        store.add_destruction_hook(move |destroyed| {
            let Some(stores) = stores.upgrade() else {
                return;
            };
            let mut stores = stores.lock();
            let registered = stores
                .get(&hook_key)
                .is_some_and(|current| std::ptr::eq(current.as_ref(), destroyed));
            if registered {
                stores.remove(&hook_key);
                trace!(key = %hook_key, remaining = stores.len(), "Deregistered destroyed bean store");
            }
        })?;
        init(&store)?;

        self.stores.lock().insert(key.clone(), Arc::clone(&store));
        debug!(registry = %self.name, key = %key, "Created bean store");
        Ok(store)
    }

    /// Look up the store for `key` without creating it
    pub fn find(&self, guard: &SessionGuard<'_>, key: &ScopeKey) -> ScopeResult<Option<Arc<BeanStore>>> {
        guard.verify(&self.owner)?;
        Ok(self.stores.lock().get(key).cloned())
    }

    pub fn contains(&self, key: &ScopeKey) -> bool {
        self.stores.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all live stores
    pub fn keys(&self) -> Vec<ScopeKey> {
        self.stores.lock().keys().cloned().collect()
    }

    /// Destroy every registered store
    ///
    /// Works on a snapshot, ordered by store name, so destruction hooks can
    /// deregister stores while the sweep runs. Afterwards the registry must
    /// be empty; a store created by a callback during the sweep breaks that.
    ///
    /// # Errors
    /// - `TeardownInvariant` if stores remain and teardown verification is on
    /// - the first store destruction failure otherwise
    pub fn destroy(&self, guard: &SessionGuard<'_>) -> ScopeResult<()> {
        guard.verify(&self.owner)?;
        let mut snapshot: Vec<Arc<BeanStore>> = self.stores.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        debug!(registry = %self.name, stores = snapshot.len(), "Destroying all bean stores");

        let mut first_failure = None;
        for store in snapshot {
            if let Err(err) = store.destroy() {
                first_failure.get_or_insert(err);
            }
        }

        let remaining = self.len();
        if remaining > 0 {
            if self.verify_teardown {
                return Err(ScopeError::TeardownInvariant {
                    registry: self.name.clone(),
                    remaining,
                });
            }
            warn!(registry = %self.name, remaining, "Bean stores left behind after teardown");
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("stores", &self.len())
            .finish()
    }
}

/// Session-level registry of UI scoped stores
///
/// Lives as a session attribute; closing the session destroys it, detaching
/// a UI destroys that UI's store.
#[derive(Debug)]
pub struct UiStore {
    registry: StoreRegistry,
}

impl UiStore {
    pub fn new(owner: SessionOwner, settings: &ScopeSettings) -> Self {
        let name = format!("ui stores of session {owner}");
        Self {
            registry: StoreRegistry::with_settings(name, owner, settings),
        }
    }

    /// Return the bean store of `ui`, creating it if absent
    pub fn get_bean_store(&self, guard: &SessionGuard<'_>, ui: UiId) -> ScopeResult<Arc<BeanStore>> {
        self.registry.get_bean_store(guard, &ScopeKey::ui(ui))
    }

    /// Return the bean store of `ui` if one exists, never creating it
    pub fn find_bean_store(&self, guard: &SessionGuard<'_>, ui: UiId) -> ScopeResult<Option<Arc<BeanStore>>> {
        self.registry.find(guard, &ScopeKey::ui(ui))
    }

    /// Destroy the store of a UI that was detached from the session
    pub fn ui_detached(&self, guard: &SessionGuard<'_>, ui: UiId) -> ScopeResult<()> {
        debug!(ui = %ui, session = %self.registry.owner(), "UI detached");
        match self.registry.find(guard, &ScopeKey::ui(ui))? {
            Some(store) => store.destroy(),
            None => Ok(()),
        }
    }

    /// Destroy the stores of all UIs
    pub fn destroy(&self, guard: &SessionGuard<'_>) -> ScopeResult<()> {
        self.registry.destroy(guard)
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }
}
