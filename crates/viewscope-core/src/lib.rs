//! Scoped bean stores for UI and view lifecycles
//!
//! This crate ties the lifetime of DI-managed beans to the lifetime of a UI
//! within a user session:
//!
//! - [`BeanStore`]: named lazy instance cache with destruction callbacks
//! - [`StoreRegistry`] / [`UiStore`]: at most one store per [`ScopeKey`],
//!   mutated only under the owning [`Session`]'s lock
//! - [`BeanStoreRetrievalStrategy`]: resolves the current store from an
//!   explicit [`ScopeContext`]
//! - [`UiScope`] and [`ScopeRegistry`]: the surface a DI container talks to
//!
//! View scoped stores are built on top of this in `viewscope-views`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use viewscope_core::{Scope, ScopeContext, Session, Ui, UiId, UiScope};
//!
//! let session = Arc::new(Session::new("session-1"));
//! let ctx = ScopeContext::for_request(session.clone(), Ui::new(UiId::new(1)));
//!
//! let scope: Arc<dyn Scope> = Arc::new(UiScope::new());
//! let cart = scope.get_or_create(&ctx, "cart", Vec::<String>::new).unwrap();
//! let same = scope.get_or_create(&ctx, "cart", Vec::<String>::new).unwrap();
//! assert!(Arc::ptr_eq(&cart, &same));
//!
//! // Closing the session destroys every UI store it owns
//! session.close().unwrap();
//! ```

pub mod bean_store;
pub mod context;
pub mod error;
pub mod key;
pub mod locking;
pub mod navigator;
pub mod registry;
pub mod retrieval;
pub mod scope;
pub mod session;
pub mod settings;

pub use bean_store::{downcast_bean, Bean, BeanStore, DestructionCallback};
pub use context::{ScopeContext, Ui};
pub use error::{BoxError, ScopeError, ScopeResult};
pub use key::{ScopeKey, UiId};
pub use locking::SessionLockingBeanStore;
pub use navigator::{ListenerId, Navigator, SimpleNavigator, ViewChangeEvent, ViewChangeListener};
pub use registry::{StoreRegistry, UiStore};
pub use retrieval::{BeanStoreRetrievalStrategy, SessionBeanStoreRetrievalStrategy};
pub use scope::{BeanFactory, Scope, ScopeRegistry, UiScope};
pub use session::{Session, SessionGuard, SessionId, SessionOwner, SessionState};
pub use settings::ScopeSettings;
