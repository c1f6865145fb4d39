//! Skiff Store - Content-addressed local disk storage
//!
//! Files live under `<root>/<node_id>/<path>/<digest>`, where `<path>`
//! is the SHA-1 of the user key split into fixed-width directory
//! segments. A single physical root can hold replicas for any number of
//! origin nodes, each scoped by its node ID.

mod path;
mod store;

pub use path::{cas_path_transform, PathKey};
pub use store::{Store, DEFAULT_ROOT};
