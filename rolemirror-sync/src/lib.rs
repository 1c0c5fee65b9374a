//! # rolemirror-sync
//!
//! Reconciliation engine: mirrors per-group member roles from a source service
//! into a persisted store.
//!
//! Call [`Pipeline::bootstrap`] to seed the [`RoleCache`] from the store, then
//! [`Pipeline::run`] to reconcile one or all configured groups. Live
//! notifications go through [`Pipeline::dispatcher`].

pub mod cache;
pub mod comparator;
pub mod dispatcher;
pub mod error;
pub mod file_store;
pub mod pager;
pub mod pipeline;
pub mod reconciler;
pub mod sink;
pub mod staleness;
pub mod store;

pub use cache::RoleCache;
pub use dispatcher::{Dispatched, EventDispatcher};
pub use error::{FetchError, PipelineError, ReconcileError, StoreError};
pub use file_store::FileRoleStore;
pub use pager::Pager;
pub use pipeline::{Pipeline, ReconcileScope};
pub use reconciler::{GroupReport, GroupState, Reconciler};
pub use sink::{RemoveOutcome, SinkAdapter, SyncOutcome};
pub use store::{MemberPage, MemberSource, RoleStore};
