//! View scoped bean stores for viewscope
//!
//! Builds the view scope on top of `viewscope-core`: every UI gets a
//! [`ViewCache`] that keeps one bean store per view and follows the UI's
//! navigation, and [`ViewScope`] exposes the store of the current view to the
//! DI container.
//!
//! ```rust
//! use std::sync::Arc;
//! use viewscope_core::{Scope, ScopeContext, ScopeRegistry, ScopeSettings, Session, SimpleNavigator, Ui, UiId};
//! use viewscope_views::{register_scopes, ViewScope};
//!
//! let registry = ScopeRegistry::new();
//! register_scopes(&registry, &ScopeSettings::default()).unwrap();
//!
//! let session = Arc::new(Session::new("session-1"));
//! let navigator = Arc::new(SimpleNavigator::new());
//! let ui = Ui::new(UiId::new(1)).with_navigator(navigator.clone());
//! let ctx = ScopeContext::for_request(session.clone(), ui);
//!
//! let views = ViewScope::new();
//! views.construct_view(&ctx, "Home", || Some("home view")).unwrap();
//! navigator.navigate_to("Home");
//!
//! let scope = registry.scope(ViewScope::NAME).unwrap();
//! assert_eq!(scope.conversation_id(&ctx).unwrap(), "session-1:1:Home");
//! ```

pub mod view_cache;
pub mod view_scope;

use std::sync::Arc;

use viewscope_core::{
    BeanStoreRetrievalStrategy, ScopeRegistry, ScopeResult, ScopeSettings, SessionBeanStoreRetrievalStrategy, UiScope,
};

pub use view_cache::{ViewCache, ViewState};
pub use view_scope::{ViewScope, VIEW_CACHE_BEAN};

/// Register the UI and view scopes under their names, sharing one retrieval strategy
pub fn register_scopes(registry: &ScopeRegistry, settings: &ScopeSettings) -> ScopeResult<()> {
    let strategy: Arc<dyn BeanStoreRetrievalStrategy> =
        Arc::new(SessionBeanStoreRetrievalStrategy::with_settings(settings.clone()));
    let ui_scope = UiScope::with_settings(settings.clone());
    ui_scope.set_retrieval_strategy(Some(Arc::clone(&strategy)));
    registry.register_scope(UiScope::NAME, Arc::new(ui_scope))?;
    registry.register_scope(
        ViewScope::NAME,
        Arc::new(ViewScope::with_strategy(strategy, settings.clone())),
    )?;
    Ok(())
}
