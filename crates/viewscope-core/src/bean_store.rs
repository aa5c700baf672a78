//! Bean Store
//!
//! A named, lazily populated map of bean instances together with the
//! destruction callbacks the DI container registered for them. A store lives
//! until its scope ends and is destroyed exactly once.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{BoxError, ScopeError, ScopeResult};

/// An opaque bean instance as handed out by the DI container
pub type Bean = Arc<dyn Any + Send + Sync>;

/// Store-level hook fired after all bean callbacks ran
type StoreHook = Box<dyn FnOnce(&BeanStore) + Send>;

/// Callback run when the scope owning a bean ends
pub struct DestructionCallback {
    inner: Box<dyn FnOnce() -> Result<(), BoxError> + Send>,
}

impl DestructionCallback {
    /// Wrap an infallible callback
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Box::new(move || {
                callback();
                Ok(())
            }),
        }
    }

    /// Wrap a callback that may report a failure
    pub fn fallible<F>(callback: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            inner: Box::new(callback),
        }
    }

    /// Run the callback; a panic is reported as an error so the sweep goes on
    fn run(self) -> Result<(), BoxError> {
        match panic::catch_unwind(AssertUnwindSafe(self.inner)) {
            Ok(result) => result,
            Err(payload) => Err(panic_message(payload.as_ref()).into()),
        }
    }
}

impl fmt::Debug for DestructionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DestructionCallback")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("destruction callback panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("destruction callback panicked: {message}")
    } else {
        "destruction callback panicked".to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum StorePhase {
    #[default]
    Live,
    /// Callbacks are running; beans are still readable
    Destroying,
    Destroyed,
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<String, Bean>,
    /// Registration order is kept so teardown is deterministic
    callbacks: Vec<(String, DestructionCallback)>,
    phase: StorePhase,
}

/// Named lazy instance cache with destruction callbacks
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use viewscope_core::BeanStore;
///
/// let store = BeanStore::new("7:Home");
/// let a: Arc<String> = store.get_or_create("greeting", || "hello".to_string()).unwrap();
/// let b: Arc<String> = store.get_or_create("greeting", || unreachable!()).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct BeanStore {
    name: String,
    state: Mutex<StoreState>,
    hooks: Mutex<Vec<StoreHook>>,
}

impl BeanStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(StoreState::default()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the bean stored under `name`, creating it with `factory` first if absent
    ///
    /// The factory runs without any store lock held, so it may resolve other
    /// beans from this store. It is invoked at most once per call and only
    /// when no instance exists.
    ///
    /// # Errors
    /// - `StoreDestroyed` if the store was destroyed
    /// - `BeanCreation` if the factory failed
    pub fn get<F>(&self, name: &str, factory: F) -> ScopeResult<Bean>
    where
        F: FnOnce() -> Result<Bean, BoxError>,
    {
        {
            let state = self.state.lock();
            self.ensure_readable(&state)?;
            if let Some(bean) = state.objects.get(name) {
                return Ok(Arc::clone(bean));
            }
        }

        trace!(store = %self.name, bean = name, "Creating bean");
        let created = factory().map_err(|source| ScopeError::bean_creation(&self.name, name, source))?;

        let mut state = self.state.lock();
        self.ensure_readable(&state)?;
        let bean = state
            .objects
            .entry(name.to_string())
            .or_insert(created);
        Ok(Arc::clone(bean))
    }

    /// Typed variant of [`get`](Self::get) with an infallible factory
    ///
    /// # Errors
    /// - `StoreDestroyed` if the store was destroyed
    /// - `TypeMismatch` if an existing bean under `name` is not a `T`
    pub fn get_or_create<T, F>(&self, name: &str, factory: F) -> ScopeResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let bean = self.get(name, || Ok(Arc::new(factory()) as Bean))?;
        downcast_bean(name, bean)
    }

    /// Return the bean stored under `name` without creating it
    pub fn find(&self, name: &str) -> ScopeResult<Option<Bean>> {
        let state = self.state.lock();
        self.ensure_readable(&state)?;
        Ok(state.objects.get(name).cloned())
    }

    /// Evict and return the bean stored under `name`
    ///
    /// Callbacks registered for the bean are discarded without being run;
    /// eviction is the caller's business, not a scope teardown.
    pub fn remove(&self, name: &str) -> ScopeResult<Option<Bean>> {
        let mut state = self.state.lock();
        self.ensure_readable(&state)?;
        state.callbacks.retain(|(bean, _)| bean != name);
        let removed = state.objects.remove(name);
        trace!(store = %self.name, bean = name, found = removed.is_some(), "Removed bean");
        Ok(removed)
    }

    /// Register one more callback for `name`; every registered callback fires on destroy
    pub fn register_destruction_callback(
        &self,
        name: &str,
        callback: DestructionCallback,
    ) -> ScopeResult<()> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        trace!(store = %self.name, bean = name, "Registering destruction callback");
        state.callbacks.push((name.to_string(), callback));
        Ok(())
    }

    /// Register a hook that runs once after this store has been destroyed
    ///
    /// Registries use this to forget the store; view caches use it to stop
    /// listening for view changes.
    pub fn add_destruction_hook<F>(&self, hook: F) -> ScopeResult<()>
    where
        F: FnOnce(&BeanStore) + Send + 'static,
    {
        let state = self.state.lock();
        self.ensure_live(&state)?;
        self.hooks.lock().push(Box::new(hook));
        Ok(())
    }

    /// Run every destruction callback, clear all beans, then run the store hooks
    ///
    /// Beans stay readable while the callbacks run, so a callback may still
    /// look up the instance it tears down. New callbacks and hooks are
    /// rejected from the moment destruction starts. All callbacks are
    /// attempted even if some fail or panic. Calling `destroy` again, also
    /// from within a callback, is a no-op.
    ///
    /// # Errors
    /// `DestructionFailed` carrying the first failure and the failure count.
    pub fn destroy(&self) -> ScopeResult<()> {
        let callbacks = {
            let mut state = self.state.lock();
            if state.phase != StorePhase::Live {
                trace!(store = %self.name, "Bean store already destroyed");
                return Ok(());
            }
            state.phase = StorePhase::Destroying;
            mem::take(&mut state.callbacks)
        };

        trace!(store = %self.name, callbacks = callbacks.len(), "Destroying bean store");

        let mut failures = 0usize;
        let mut first_failure = None;
        for (bean, callback) in callbacks {
            if let Err(err) = callback.run() {
                warn!(store = %self.name, bean = %bean, error = %err, "Destruction callback failed");
                failures += 1;
                first_failure.get_or_insert(err);
            }
        }

        let objects = {
            let mut state = self.state.lock();
            state.phase = StorePhase::Destroyed;
            mem::take(&mut state.objects)
        };
        trace!(store = %self.name, beans = objects.len(), "Cleared bean store");
        drop(objects);

        let hooks = mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook(self);
        }

        match first_failure {
            Some(source) => Err(ScopeError::DestructionFailed {
                store: self.name.clone(),
                failures,
                source,
            }),
            None => Ok(()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().objects.contains_key(name)
    }

    /// Number of live beans
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once destruction has started
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().phase != StorePhase::Live
    }

    fn ensure_live(&self, state: &StoreState) -> ScopeResult<()> {
        if state.phase != StorePhase::Live {
            return Err(ScopeError::StoreDestroyed(self.name.clone()));
        }
        Ok(())
    }

    fn ensure_readable(&self, state: &StoreState) -> ScopeResult<()> {
        if state.phase == StorePhase::Destroyed {
            return Err(ScopeError::StoreDestroyed(self.name.clone()));
        }
        Ok(())
    }
}

/// Downcast a bean to its concrete type
pub fn downcast_bean<T: Any + Send + Sync>(name: &str, bean: Bean) -> ScopeResult<Arc<T>> {
    bean.downcast::<T>().map_err(|_| ScopeError::TypeMismatch {
        bean: name.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

impl fmt::Debug for BeanStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BeanStore")
            .field("name", &self.name)
            .field("beans", &state.objects.len())
            .field("callbacks", &state.callbacks.len())
            .field("phase", &state.phase)
            .finish()
    }
}

impl fmt::Display for BeanStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BeanStore[{}]", self.name)
    }
}
