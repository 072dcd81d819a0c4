//! Swiftpack - source-based package manager workspace core
//!
//! Turns a set of root packages plus declared dependencies into a
//! resolved, pinned, on-disk working tree, and compiles and runs
//! user-authored build plugins in a sandboxed subprocess.

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod manifest;
pub mod package;
pub mod plugin;
pub mod repository;
pub mod state;
pub mod workspace;

pub use error::{SwiftpackError, SwiftpackResult};
pub use workspace::{Workspace, WorkspaceConfiguration};
