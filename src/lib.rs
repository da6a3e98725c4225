// ABOUTME: Library crate for saltbox: throwaway Salt minion containers for integration tests

#![allow(missing_docs)]

pub mod docker;
pub mod minion;

pub use docker::{ContainerError, ContainerManager, ExecOutput, ImageBuilder};
pub use minion::{EnvRoots, LogLevel, MinionConfig, RootEntry, SaltContainer, WILDCARD_ENV};
