//! rolemirror core library: domain types, configuration, errors.
//!
//! - [`types`]: identifier newtypes, [`RoleSet`], records and observations
//! - [`config`]: YAML + environment configuration
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, LogFormat, RunMode, SourceConfig};
pub use error::ConfigError;
pub use types::{GroupId, MemberId, MemberRoleObservation, RoleKey, RoleRecord, RoleSet};
