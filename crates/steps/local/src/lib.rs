//! # hodei-steps-local
//!
//! Host-side adapters for the `hodei-steps-core` ports: a [`LocalContainer`]
//! that runs processes directly on the machine, rooted at a directory, and
//! an [`FsArtifactStore`] that moves artifacts addressed by `file://` URLs.

pub mod artifact_store;
pub mod container;
pub mod error;
mod paths;

pub use artifact_store::FsArtifactStore;
pub use container::{LocalContainer, LocalProcess};
pub use error::{LocalError, LocalResult};
pub use paths::resolve_under;
