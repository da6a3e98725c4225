// ABOUTME: Docker integration for building minion images and managing throwaway containers

pub mod builder;
pub mod container_manager;

pub use builder::{BuildOptions, ImageBuilder};
pub use container_manager::{ContainerError, ContainerManager, ExecOutput, RunOptions};
