//! Cluster description and engine settings
//!
//! The cluster document is parsed into a [`ClusterSpec`], validated, and then
//! turned into the [`ClusterConfig`] a pipeline operates on.

pub mod cluster;
pub mod document;
pub mod flags;
pub mod parser;
pub mod settings;

pub use cluster::{
    ClusterConfig, Component, ControlPlaneConfig, ControlPlaneMetadata, RegistryConfig,
    RegistryMetadata, RuntimeConfig, RuntimeMetadata,
};
pub use document::{
    ClusterSpec, HookAction, HookCommands, HookStage, Hooks, HostSpec, LocalhostSpec, SshSpec,
};
pub use flags::Flags;
pub use parser::ClusterParser;
pub use settings::Settings;
