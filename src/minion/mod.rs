// ABOUTME: Salt minion fixture: fluent configuration, config materialization, salt-call exec

pub mod config;
pub mod container;
pub mod roots;

pub use config::{LogLevel, MinionConfig};
pub use container::SaltContainer;
pub use roots::{EnvRoots, RootEntry, WILDCARD_ENV};
