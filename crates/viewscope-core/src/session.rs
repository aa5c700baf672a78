//! Sessions and the session lock
//!
//! One browser session may be served by several concurrent requests. All
//! registry mutation for a session happens while its lock is held, and the
//! held lock is represented by a [`SessionGuard`] that registry operations
//! take as a token. The lock is reentrant so code already holding it (a
//! navigator listener, a locking bean store) can take it again on the same
//! thread.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ScopeError, ScopeResult};

/// Identifier of an HTTP session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`Session`] instance
///
/// Registries record the owner they were created for and only accept guards
/// of that exact session. Two sessions never share an owner, even when their
/// ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionOwner {
    id: SessionId,
    instance: u64,
}

impl SessionOwner {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Identity of this session instance, checked against held guards
    pub fn owner(&self) -> &SessionOwner {
        self
    }
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Serving requests
    Open,
    /// Destroy listeners are running
    Closing,
    /// Torn down; no store may be created or resolved
    Closed,
}

type DestroyListener = Box<dyn FnOnce(&SessionGuard<'_>) -> ScopeResult<()> + Send>;

/// A user session owning its lock, typed attributes and destroy listeners
pub struct Session {
    owner: SessionOwner,
    lock: ReentrantMutex<()>,
    state: RwLock<SessionState>,
    attributes: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    destroy_listeners: Mutex<Vec<DestroyListener>>,
}

/// Proof that the current thread holds a session's lock
///
/// Obtained only through [`Session::lock`]; registry operations take
/// `&SessionGuard` and reject guards of other sessions.
pub struct SessionGuard<'a> {
    session: &'a Session,
    _held: ReentrantMutexGuard<'a, ()>,
}

impl SessionGuard<'_> {
    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Check that this guard locks the session instance `owner`
    pub fn verify(&self, owner: &SessionOwner) -> ScopeResult<()> {
        if self.session.owner != *owner {
            return Err(ScopeError::LockNotHeld {
                expected: owner.id.clone(),
                actual: self.session.id().clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SessionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", self.session.id())
            .finish()
    }
}

impl Session {
    /// Create an open session
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            owner: SessionOwner {
                id: id.into(),
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            },
            lock: ReentrantMutex::new(()),
            state: RwLock::new(SessionState::Open),
            attributes: Mutex::new(HashMap::new()),
            destroy_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.owner.id
    }

    /// Identity of this session instance, checked against held guards
    pub fn owner(&self) -> &SessionOwner {
        &self.owner
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Acquire the session lock, blocking until it is available
    pub fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            _held: self.lock.lock(),
        }
    }

    /// Acquire the session lock, failing unless the session is still open
    ///
    /// The state is read after the lock is taken, so a close that completed
    /// while this thread was waiting is observed.
    pub fn lock_open(&self) -> ScopeResult<SessionGuard<'_>> {
        let guard = self.lock();
        if !self.is_open() {
            return Err(ScopeError::SessionNotOpen(self.id().clone()));
        }
        Ok(guard)
    }

    /// Acquire the session lock if no other thread holds it
    pub fn try_lock(&self) -> Option<SessionGuard<'_>> {
        self.lock.try_lock().map(|held| SessionGuard {
            session: self,
            _held: held,
        })
    }

    /// Read a typed attribute
    pub fn attribute<T: Any + Send + Sync>(&self, guard: &SessionGuard<'_>) -> ScopeResult<Option<Arc<T>>> {
        guard.verify(&self.owner)?;
        let attributes = self.attributes.lock();
        Ok(attributes
            .get(&TypeId::of::<T>())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok()))
    }

    /// Store a typed attribute, replacing any previous value of the same type
    pub fn set_attribute<T: Any + Send + Sync>(&self, guard: &SessionGuard<'_>, value: Arc<T>) -> ScopeResult<()> {
        guard.verify(&self.owner)?;
        self.attributes.lock().insert(TypeId::of::<T>(), value);
        Ok(())
    }

    /// Return the attribute of type `T`, initializing it with `init` if absent
    ///
    /// `init` runs with the session lock held but without the attribute map
    /// locked, so it may register destroy listeners.
    pub fn get_or_init_attribute<T, F>(&self, guard: &SessionGuard<'_>, init: F) -> ScopeResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(&SessionGuard<'_>) -> ScopeResult<Arc<T>>,
    {
        if let Some(existing) = self.attribute::<T>(guard)? {
            return Ok(existing);
        }
        let created = init(guard)?;
        self.set_attribute(guard, Arc::clone(&created))?;
        debug!(session = %self.owner, attribute = std::any::type_name::<T>(), "Initialized session attribute");
        Ok(created)
    }

    /// Register a listener fired once when the session closes
    ///
    /// # Errors
    /// `SessionNotOpen` once closing has started, since the listener would
    /// never fire.
    pub fn add_destroy_listener<F>(&self, guard: &SessionGuard<'_>, listener: F) -> ScopeResult<()>
    where
        F: FnOnce(&SessionGuard<'_>) -> ScopeResult<()> + Send + 'static,
    {
        guard.verify(&self.owner)?;
        if !self.is_open() {
            return Err(ScopeError::SessionNotOpen(self.id().clone()));
        }
        self.destroy_listeners.lock().push(Box::new(listener));
        Ok(())
    }

    /// Close the session: run destroy listeners, then drop all attributes
    ///
    /// Every listener runs even if an earlier one fails; the first failure is
    /// returned. Closing an already closed session does nothing.
    pub fn close(&self) -> ScopeResult<()> {
        let guard = self.lock();
        {
            let mut state = self.state.write();
            if *state != SessionState::Open {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        info!(session = %self.owner, "Closing session");

        let listeners = mem::take(&mut *self.destroy_listeners.lock());
        let mut first_failure = None;
        for listener in listeners {
            if let Err(err) = listener(&guard) {
                warn!(session = %self.owner, error = %err, "Session destroy listener failed");
                first_failure.get_or_insert(err);
            }
        }

        let attributes = mem::take(&mut *self.attributes.lock());
        drop(attributes);
        *self.state.write() = SessionState::Closed;

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lock_is_reentrant() {
        let session = Session::new("s1");
        let outer = session.lock();
        let inner = session.lock();
        assert_eq!(outer.session_id(), inner.session_id());
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let session = Arc::new(Session::new("s1"));
        let _guard = session.lock();

        let other = Arc::clone(&session);
        let acquired = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);
    }

    #[test]
    fn test_foreign_guard_rejected() {
        let owner = Session::new("owner");
        let stranger = Session::new("stranger");
        let guard = stranger.lock();

        let result = owner.set_attribute(&guard, Arc::new(1u8));
        assert!(matches!(result, Err(ScopeError::LockNotHeld { .. })));
    }

    #[test]
    fn test_guard_of_session_with_equal_id_rejected() {
        let owner = Session::new("same");
        let twin = Session::new("same");
        let guard = twin.lock();

        assert_ne!(owner.owner(), twin.owner());
        assert!(matches!(guard.verify(owner.owner()), Err(ScopeError::LockNotHeld { .. })));
        assert!(matches!(
            owner.attribute::<u8>(&guard),
            Err(ScopeError::LockNotHeld { .. })
        ));
        assert!(guard.verify(twin.owner()).is_ok());
    }

    #[test]
    fn test_lock_open_fails_after_close() {
        let session = Session::new("s1");
        assert!(session.lock_open().is_ok());

        session.close().unwrap();
        assert!(matches!(session.lock_open(), Err(ScopeError::SessionNotOpen(_))));
    }

    #[test]
    fn test_destroy_listener_rejected_once_closed() {
        let session = Session::new("s1");
        session.close().unwrap();

        let guard = session.lock();
        let result = session.add_destroy_listener(&guard, |_| Ok(()));
        assert!(matches!(result, Err(ScopeError::SessionNotOpen(_))));
    }

    #[test]
    fn test_attribute_initialized_once() {
        let session = Session::new("s1");
        let guard = session.lock();
        let calls = AtomicUsize::new(0);

        let first = session
            .get_or_init_attribute(&guard, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(String::from("store")))
            })
            .unwrap();
        let second = session
            .get_or_init_attribute::<String, _>(&guard, |_| unreachable!())
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_runs_listeners_and_clears_attributes() {
        let session = Session::new("s1");
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let guard = session.lock();
            session.set_attribute(&guard, Arc::new(5u32)).unwrap();
            for _ in 0..2 {
                let fired = Arc::clone(&fired);
                session
                    .add_destroy_listener(&guard, move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
            }
        }

        session.close().unwrap();
        session.close().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), SessionState::Closed);
        let guard = session.lock();
        assert!(session.attribute::<u32>(&guard).unwrap().is_none());
    }

    #[test]
    fn test_close_surfaces_first_listener_failure() {
        let session = Session::new("s1");
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let guard = session.lock();
            session
                .add_destroy_listener(&guard, |_| Err(ScopeError::NoActiveView))
                .unwrap();
            let fired = Arc::clone(&fired);
            session
                .add_destroy_listener(&guard, move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        let result = session.close();
        assert!(matches!(result, Err(ScopeError::NoActiveView)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }
}
