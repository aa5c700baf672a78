//! Per-UI cache of view scoped bean stores
//!
//! A [`ViewCache`] follows one UI through its navigation: the store of a view
//! is created when the view starts being constructed, becomes active when the
//! UI navigates to it and is destroyed as soon as the UI navigates elsewhere.
//! Only one view is active at a time and inactive views are not kept around.
//!
//! Navigation events reach the cache either directly through
//! [`ViewCache::after_view_change`] or through the listener each view store
//! subscribes to the UI's [`Navigator`](viewscope_core::Navigator).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use viewscope_core::{
    BeanStore, ScopeError, ScopeKey, ScopeResult, ScopeSettings, Session, SessionGuard, StoreRegistry, Ui,
    ViewChangeEvent, ViewChangeListener,
};

/// Lifecycle position of a view within its UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewState {
    /// No store exists for the view
    Absent,
    /// The view is being constructed; its store resolves view scoped beans
    UnderConstruction,
    /// Constructed but not navigated to
    Inactive,
    /// The view the UI currently shows
    Active,
}

#[derive(Debug, Default)]
struct CacheState {
    view_under_construction: Option<String>,
    active_view: Option<String>,
}

/// View stores of one UI, keyed by view name
pub struct ViewCache {
    ui: Ui,
    session: Weak<Session>,
    registry: StoreRegistry,
    state: Mutex<CacheState>,
    this: Weak<ViewCache>,
}

impl ViewCache {
    /// Create the cache for `ui` within `session`
    pub fn new(session: &Arc<Session>, ui: Ui, settings: &ScopeSettings) -> Arc<Self> {
        let name = format!("view stores of UI {}", ui.id());
        let registry = StoreRegistry::with_settings(name, session.owner().clone(), settings);
        Arc::new_cyclic(|this| Self {
            ui,
            session: Arc::downgrade(session),
            registry,
            state: Mutex::new(CacheState::default()),
            this: this.clone(),
        })
    }

    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// A view is about to be constructed
    ///
    /// Creates the view's store eagerly so beans resolved while the view is
    /// built land in it.
    ///
    /// # Errors
    /// - `NoNavigator` if the UI has no navigator to follow
    /// - `LockNotHeld` if `guard` locks another session
    pub fn creating_view(&self, guard: &SessionGuard<'_>, view_name: &str) -> ScopeResult<()> {
        trace!(ui = %self.ui.id(), view = view_name, "Creating view");
        self.get_or_create_bean_store(guard, view_name)?;
        self.state.lock().view_under_construction = Some(view_name.to_string());
        Ok(())
    }

    /// Construction of a view finished; `view` is `None` if it failed
    ///
    /// The store of a view that could not be constructed is destroyed right
    /// away.
    pub fn view_created(&self, guard: &SessionGuard<'_>, view_name: &str, view: Option<&dyn Any>) -> ScopeResult<()> {
        trace!(ui = %self.ui.id(), view = view_name, created = view.is_some(), "View created");
        self.state.lock().view_under_construction = None;
        let store = self.get_or_create_bean_store(guard, view_name)?;
        if view.is_none() {
            trace!(ui = %self.ui.id(), view = view_name, "View construction failed, destroying its bean store");
            store.destroy()?;
        }
        Ok(())
    }

    /// Scope listeners never veto a navigation
    pub fn before_view_change(&self, _event: &ViewChangeEvent) -> bool {
        true
    }

    /// The UI navigated to `target`
    ///
    /// `target` becomes the active view; every other tracked view is
    /// deactivated and its store destroyed. All views are processed even if
    /// destroying one fails; the first failure is returned.
    pub fn after_view_change(&self, guard: &SessionGuard<'_>, target: &str) -> ScopeResult<()> {
        guard.verify(self.registry.owner())?;
        let mut first_failure = None;
        for view_name in self.tracked_views() {
            if let Err(err) = self.on_view_change(guard, &view_name, target) {
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Store of the view under construction, or else of the active view
    ///
    /// # Errors
    /// - `NoActiveView` if no view is under construction or active
    /// - `ViewNotCreated` if the current view has no store
    pub fn current_view_bean_store(&self, guard: &SessionGuard<'_>) -> ScopeResult<Arc<BeanStore>> {
        let (under_construction, active) = {
            let state = self.state.lock();
            (state.view_under_construction.clone(), state.active_view.clone())
        };
        if let Some(view_name) = under_construction {
            trace!(view = %view_name, "Using bean store of view under construction");
            return self.existing_bean_store(guard, &view_name);
        }
        if let Some(view_name) = active {
            trace!(view = %view_name, "Using bean store of active view");
            return self.existing_bean_store(guard, &view_name);
        }
        Err(ScopeError::NoActiveView)
    }

    /// Name of the view whose store [`current_view_bean_store`](Self::current_view_bean_store) resolves
    pub fn current_view(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .view_under_construction
            .clone()
            .or_else(|| state.active_view.clone())
    }

    pub fn active_view(&self) -> Option<String> {
        self.state.lock().active_view.clone()
    }

    pub fn view_under_construction(&self) -> Option<String> {
        self.state.lock().view_under_construction.clone()
    }

    pub fn view_state(&self, view_name: &str) -> ViewState {
        if !self.registry.contains(&self.key(view_name)) {
            return ViewState::Absent;
        }
        let state = self.state.lock();
        if state.view_under_construction.as_deref() == Some(view_name) {
            ViewState::UnderConstruction
        } else if state.active_view.as_deref() == Some(view_name) {
            ViewState::Active
        } else {
            ViewState::Inactive
        }
    }

    /// Names of the views that currently have a store, sorted
    pub fn tracked_views(&self) -> Vec<String> {
        let mut views: Vec<String> = self
            .registry
            .keys()
            .into_iter()
            .filter_map(|key| key.view_name().map(str::to_string))
            .collect();
        views.sort();
        views
    }

    /// Destroy the stores of all views of this UI
    pub fn destroy(&self, guard: &SessionGuard<'_>) -> ScopeResult<()> {
        guard.verify(self.registry.owner())?;
        debug!(ui = %self.ui.id(), views = self.registry.len(), "Destroying view cache");
        let result = self.registry.destroy(guard);
        let mut state = self.state.lock();
        state.view_under_construction = None;
        state.active_view = None;
        result
    }

    fn key(&self, view_name: &str) -> ScopeKey {
        ScopeKey::view(self.ui.id(), view_name)
    }

    fn existing_bean_store(&self, guard: &SessionGuard<'_>, view_name: &str) -> ScopeResult<Arc<BeanStore>> {
        self.registry
            .find(guard, &self.key(view_name))?
            .ok_or_else(|| ScopeError::ViewNotCreated(view_name.to_string()))
    }

    fn get_or_create_bean_store(&self, guard: &SessionGuard<'_>, view_name: &str) -> ScopeResult<Arc<BeanStore>> {
        self.registry.get_or_create_with(guard, &self.key(view_name), |store| {
            let navigator = Arc::clone(self.ui.navigator().ok_or(ScopeError::NoNavigator(self.ui.id()))?);
            let listener = Arc::new(ViewStoreListener {
                view_name: view_name.to_string(),
                store: Arc::downgrade(store),
                cache: self.this.clone(),
                session: self.session.clone(),
            });
            trace!(ui = %self.ui.id(), view = view_name, "Adding view change listener");
            let id = navigator.add_view_change_listener(listener);
            store.add_destruction_hook(move |destroyed| {
                trace!(store = destroyed.name(), listener = %id, "Removing view change listener");
                navigator.remove_view_change_listener(id);
            })
        })
    }

    fn on_view_change(&self, guard: &SessionGuard<'_>, view_name: &str, target: &str) -> ScopeResult<()> {
        if view_name == target {
            self.view_activated(view_name);
            Ok(())
        } else {
            self.view_deactivated(guard, view_name)
        }
    }

    fn view_activated(&self, view_name: &str) {
        trace!(ui = %self.ui.id(), view = view_name, "View activated");
        self.state.lock().active_view = Some(view_name.to_string());
    }

    fn view_deactivated(&self, guard: &SessionGuard<'_>, view_name: &str) -> ScopeResult<()> {
        trace!(ui = %self.ui.id(), view = view_name, "View deactivated");
        {
            let mut state = self.state.lock();
            if state.active_view.as_deref() == Some(view_name) {
                state.active_view = None;
            }
        }
        let store = self.existing_bean_store(guard, view_name)?;
        store.destroy()?;
        trace!(ui = %self.ui.id(), remaining = self.registry.len(), "Destroyed bean store of deactivated view");
        Ok(())
    }

    /// Navigation event delivered to the listener of `store`
    ///
    /// Ignored unless `store` is still the registered store of `view_name`;
    /// a navigator may deliver to a listener from a snapshot taken before the
    /// store went away.
    fn store_view_change(
        &self,
        guard: &SessionGuard<'_>,
        view_name: &str,
        store: &Arc<BeanStore>,
        target: &str,
    ) -> ScopeResult<()> {
        let current = self.registry.find(guard, &self.key(view_name))?;
        if !current.is_some_and(|current| Arc::ptr_eq(&current, store)) {
            trace!(view = view_name, "Ignoring view change for a stale view store");
            return Ok(());
        }
        self.on_view_change(guard, view_name, target)
    }
}

impl fmt::Debug for ViewCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ViewCache")
            .field("ui", &self.ui.id())
            .field("views", &self.registry.len())
            .field("view_under_construction", &state.view_under_construction)
            .field("active_view", &state.active_view)
            .finish()
    }
}

/// Navigator subscription held by one view store
struct ViewStoreListener {
    view_name: String,
    store: Weak<BeanStore>,
    cache: Weak<ViewCache>,
    session: Weak<Session>,
}

impl ViewChangeListener for ViewStoreListener {
    fn before_view_change(&self, event: &ViewChangeEvent) -> bool {
        match self.cache.upgrade() {
            Some(cache) => cache.before_view_change(event),
            None => true,
        }
    }

    fn after_view_change(&self, event: &ViewChangeEvent) {
        let (Some(cache), Some(store), Some(session)) =
            (self.cache.upgrade(), self.store.upgrade(), self.session.upgrade())
        else {
            return;
        };
        if store.is_destroyed() {
            return;
        }

        let guard = session.lock();
        if let Err(err) = cache.store_view_change(&guard, &self.view_name, &store, event.view_name()) {
            warn!(
                view = %self.view_name,
                target = event.view_name(),
                error = %err,
                "Failed to process view change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use viewscope_core::{DestructionCallback, SimpleNavigator, UiId};

    struct Fixture {
        session: Arc<Session>,
        navigator: Arc<SimpleNavigator>,
        cache: Arc<ViewCache>,
    }

    fn fixture() -> Fixture {
        let session = Arc::new(Session::new("s1"));
        let navigator = Arc::new(SimpleNavigator::new());
        let ui = Ui::new(UiId::new(1)).with_navigator(navigator.clone());
        let cache = ViewCache::new(&session, ui, &ScopeSettings::default());
        Fixture {
            session,
            navigator,
            cache,
        }
    }

    /// creating → created(success) for `view`
    fn construct(fixture: &Fixture, view: &str) {
        let guard = fixture.session.lock();
        fixture.cache.creating_view(&guard, view).unwrap();
        fixture.cache.view_created(&guard, view, Some(&())).unwrap();
    }

    fn counting_callback(store: &BeanStore, counter: &Arc<AtomicUsize>) {
        let counter = Arc::clone(counter);
        store
            .register_destruction_callback(
                "bean",
                DestructionCallback::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    #[test]
    fn test_creating_view_requires_navigator() {
        let session = Arc::new(Session::new("s1"));
        let cache = ViewCache::new(&session, Ui::new(UiId::new(2)), &ScopeSettings::default());
        let guard = session.lock();

        let err = cache.creating_view(&guard, "Home").unwrap_err();
        assert!(matches!(err, ScopeError::NoNavigator(ui) if ui == UiId::new(2)));
        assert_eq!(cache.view_state("Home"), ViewState::Absent);
    }

    #[test]
    fn test_creating_view_subscribes_listener() {
        let f = fixture();
        let guard = f.session.lock();

        f.cache.creating_view(&guard, "Home").unwrap();

        assert_eq!(f.navigator.listener_count(), 1);
        assert_eq!(f.cache.view_state("Home"), ViewState::UnderConstruction);
        assert_eq!(f.cache.current_view().as_deref(), Some("Home"));
    }

    #[test]
    fn test_under_construction_store_is_current() {
        let f = fixture();
        let guard = f.session.lock();

        f.cache.creating_view(&guard, "Home").unwrap();
        let store = f.cache.current_view_bean_store(&guard).unwrap();

        assert_eq!(store.name(), "1:Home");
    }

    #[test]
    fn test_successful_construction_leaves_view_inactive() {
        let f = fixture();
        construct(&f, "Home");

        assert_eq!(f.cache.view_state("Home"), ViewState::Inactive);
        assert_eq!(f.cache.view_under_construction(), None);
        assert_eq!(f.cache.tracked_views(), vec!["Home".to_string()]);
    }

    #[test]
    fn test_failed_construction_destroys_store() {
        let f = fixture();
        let guard = f.session.lock();
        let fired = Arc::new(AtomicUsize::new(0));

        f.cache.creating_view(&guard, "Broken").unwrap();
        let store = f.cache.current_view_bean_store(&guard).unwrap();
        counting_callback(&store, &fired);
        f.cache.view_created(&guard, "Broken", None).unwrap();

        assert!(store.is_destroyed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.view_state("Broken"), ViewState::Absent);
        assert_eq!(f.navigator.listener_count(), 0);
    }

    #[test]
    fn test_no_active_view() {
        let f = fixture();
        let guard = f.session.lock();

        let err = f.cache.current_view_bean_store(&guard).unwrap_err();
        assert!(matches!(err, ScopeError::NoActiveView));
        assert_eq!(err.to_string(), "No active view");
    }

    #[test]
    fn test_navigation_activates_and_destroys_previous() {
        let f = fixture();
        let home_fired = Arc::new(AtomicUsize::new(0));

        construct(&f, "Home");
        {
            let guard = f.session.lock();
            f.cache.after_view_change(&guard, "Home").unwrap();
            let home = f.cache.current_view_bean_store(&guard).unwrap();
            counting_callback(&home, &home_fired);
        }
        assert_eq!(f.cache.view_state("Home"), ViewState::Active);

        construct(&f, "Settings");
        let guard = f.session.lock();
        f.cache.after_view_change(&guard, "Settings").unwrap();

        assert_eq!(home_fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.view_state("Home"), ViewState::Absent);
        assert_eq!(f.cache.view_state("Settings"), ViewState::Active);
        assert_eq!(f.cache.current_view_bean_store(&guard).unwrap().name(), "1:Settings");
        assert_eq!(f.cache.registry().len(), 1);
    }

    #[test]
    fn test_navigation_destroys_every_view_past_failures() {
        let f = fixture();
        let fired = Arc::new(AtomicUsize::new(0));
        let guard = f.session.lock();
        for view in ["About", "Home", "Profile", "Settings"] {
            f.cache.creating_view(&guard, view).unwrap();
            let store = f.cache.current_view_bean_store(&guard).unwrap();
            if view == "About" || view == "Home" {
                store
                    .register_destruction_callback(
                        "broken",
                        DestructionCallback::fallible(|| Err("cannot release".into())),
                    )
                    .unwrap();
            }
            counting_callback(&store, &fired);
            f.cache.view_created(&guard, view, Some(&())).unwrap();
        }

        let result = f.cache.after_view_change(&guard, "Settings");

        match result {
            Err(ScopeError::DestructionFailed { store, .. }) => assert_eq!(store, "1:About"),
            other => panic!("expected the first destruction failure, got {other:?}"),
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(f.cache.tracked_views(), vec!["Settings".to_string()]);
        assert_eq!(f.cache.view_state("Settings"), ViewState::Active);
        assert_eq!(f.navigator.listener_count(), 1);
    }

    #[test]
    fn test_navigator_events_drive_the_cache() {
        let f = fixture();
        let home_fired = Arc::new(AtomicUsize::new(0));

        construct(&f, "Home");
        assert!(f.navigator.navigate_to("Home"));
        {
            let guard = f.session.lock();
            counting_callback(&f.cache.current_view_bean_store(&guard).unwrap(), &home_fired);
        }
        assert_eq!(f.cache.active_view().as_deref(), Some("Home"));

        construct(&f, "Settings");
        assert!(f.navigator.navigate_to("Settings"));

        assert_eq!(home_fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.active_view().as_deref(), Some("Settings"));
        assert_eq!(f.cache.tracked_views(), vec!["Settings".to_string()]);
        assert_eq!(f.navigator.listener_count(), 1);
    }

    #[test]
    fn test_navigating_to_same_view_keeps_store() {
        let f = fixture();
        construct(&f, "Home");
        f.navigator.navigate_to("Home");

        let before = {
            let guard = f.session.lock();
            f.cache.current_view_bean_store(&guard).unwrap()
        };
        f.navigator.navigate_to("Home");

        let guard = f.session.lock();
        assert!(Arc::ptr_eq(&before, &f.cache.current_view_bean_store(&guard).unwrap()));
        assert!(!before.is_destroyed());
    }

    #[test]
    fn test_view_change_is_never_vetoed() {
        let f = fixture();
        construct(&f, "Home");

        let event = ViewChangeEvent::new(None, "Elsewhere", "");
        assert!(f.cache.before_view_change(&event));
        assert!(f.navigator.navigate_to("Elsewhere"));
    }

    #[test]
    fn test_active_view_without_store_is_reported() {
        let f = fixture();
        construct(&f, "Home");
        let guard = f.session.lock();
        f.cache.after_view_change(&guard, "Home").unwrap();

        f.cache.current_view_bean_store(&guard).unwrap().destroy().unwrap();

        assert!(matches!(
            f.cache.current_view_bean_store(&guard),
            Err(ScopeError::ViewNotCreated(view)) if view == "Home"
        ));
    }

    #[test]
    fn test_destroy_clears_all_views() {
        let f = fixture();
        construct(&f, "Home");
        {
            let guard = f.session.lock();
            f.cache.after_view_change(&guard, "Home").unwrap();
            f.cache.creating_view(&guard, "Settings").unwrap();
        }

        let guard = f.session.lock();
        f.cache.destroy(&guard).unwrap();

        assert!(f.cache.registry().is_empty());
        assert_eq!(f.cache.current_view(), None);
        assert_eq!(f.navigator.listener_count(), 0);
        assert!(matches!(
            f.cache.current_view_bean_store(&guard),
            Err(ScopeError::NoActiveView)
        ));
    }

    #[test]
    fn test_rejects_foreign_guard() {
        let f = fixture();
        let stranger = Session::new("stranger");
        let guard = stranger.lock();

        assert!(matches!(
            f.cache.creating_view(&guard, "Home"),
            Err(ScopeError::LockNotHeld { .. })
        ));
        assert!(matches!(
            f.cache.after_view_change(&guard, "Home"),
            Err(ScopeError::LockNotHeld { .. })
        ));
    }

    #[test]
    fn test_stale_listener_ignores_recreated_store() {
        let f = fixture();
        construct(&f, "Home");
        let stale_store = {
            let guard = f.session.lock();
            f.cache.registry().find(&guard, &ScopeKey::view(UiId::new(1), "Home")).unwrap().unwrap()
        };
        let stale = ViewStoreListener {
            view_name: "Home".to_string(),
            store: Arc::downgrade(&stale_store),
            cache: Arc::downgrade(&f.cache),
            session: Arc::downgrade(&f.session),
        };

        stale_store.destroy().unwrap();
        construct(&f, "Home");
        stale.after_view_change(&ViewChangeEvent::new(None, "Settings", ""));

        assert_eq!(f.cache.view_state("Home"), ViewState::Inactive);
    }

    #[test]
    fn test_deactivated_view_unsubscribes() {
        let f = fixture();
        construct(&f, "Home");
        construct(&f, "Settings");
        assert_eq!(f.navigator.listener_count(), 2);

        f.navigator.navigate_to("Settings");

        assert_eq!(f.navigator.listener_count(), 1);
        assert_eq!(f.cache.view_state("Settings"), ViewState::Active);
    }
}
