//! Session locking bean store handle
//!
//! The DI container calls into stores from request threads without knowing
//! about session locks. This handle takes the owning session's lock around
//! every store operation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::bean_store::{Bean, BeanStore, DestructionCallback};
use crate::error::{BoxError, ScopeResult};
use crate::session::Session;

/// A bean store paired with the session whose lock guards it
#[derive(Clone)]
pub struct SessionLockingBeanStore {
    session: Arc<Session>,
    store: Arc<BeanStore>,
}

impl SessionLockingBeanStore {
    pub fn new(session: Arc<Session>, store: Arc<BeanStore>) -> Self {
        Self { session, store }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<BeanStore> {
        &self.store
    }

    /// Whether both handles point to the identical store
    pub fn same_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    pub fn get<F>(&self, name: &str, factory: F) -> ScopeResult<Bean>
    where
        F: FnOnce() -> Result<Bean, BoxError>,
    {
        let _guard = self.session.lock();
        self.store.get(name, factory)
    }

    pub fn get_or_create<T, F>(&self, name: &str, factory: F) -> ScopeResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let _guard = self.session.lock();
        self.store.get_or_create(name, factory)
    }

    pub fn find(&self, name: &str) -> ScopeResult<Option<Bean>> {
        let _guard = self.session.lock();
        self.store.find(name)
    }

    pub fn remove(&self, name: &str) -> ScopeResult<Option<Bean>> {
        let _guard = self.session.lock();
        self.store.remove(name)
    }

    pub fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) -> ScopeResult<()> {
        let _guard = self.session.lock();
        self.store.register_destruction_callback(name, callback)
    }

    pub fn destroy(&self) -> ScopeResult<()> {
        let _guard = self.session.lock();
        self.store.destroy()
    }
}

impl fmt::Debug for SessionLockingBeanStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLockingBeanStore")
            .field("session", self.session.id())
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_concurrent_get_creates_once() {
        let session = Arc::new(Session::new("s1"));
        let store = SessionLockingBeanStore::new(Arc::clone(&session), Arc::new(BeanStore::new("1")));
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let created = Arc::clone(&created);
                thread::spawn(move || {
                    store
                        .get_or_create("counter", || {
                            created.fetch_add(1, Ordering::SeqCst);
                            AtomicUsize::new(0)
                        })
                        .unwrap()
                })
            })
            .collect();
        let beans: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(beans.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_operations_work_while_caller_holds_lock() {
        let session = Arc::new(Session::new("s1"));
        let store = SessionLockingBeanStore::new(Arc::clone(&session), Arc::new(BeanStore::new("1")));

        let _held = session.lock();
        store.get_or_create("bean", || 1u8).unwrap();
        assert!(store.remove("bean").unwrap().is_some());
        store.destroy().unwrap();
        assert!(store.store().is_destroyed());
    }
}
