//! Ship modules - discovery, validation and execution of containerized tool modules
//!
//! Modules are described by `module.yaml` descriptors found in builtin, user,
//! project and git sources, and run either as a container image or as a
//! pipeline engine function.

pub mod cli;
pub mod config;
pub mod modules;

pub use config::ModuleConfig;
pub use modules::{ExecutionDispatcher, Manager, Module};
