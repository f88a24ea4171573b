use std::sync::Arc;

use crate::Result;

/// Version wildcard accepted by [`CoordinationBackend::set`].
pub const ANY_VERSION: i32 = -1;

/// How [`CoordinationBackend::create`] names the new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Create exactly the given path.
    Persistent,
    /// Append a 10-digit zero-padded counter, unique under the parent, to the
    /// given path.
    PersistentSequential,
}

/// A node's payload and its data version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub payload: Vec<u8>,
    /// Incremented on every successful `set`; starts at 0.
    pub version: i32,
}

/// A hierarchical, strongly consistent key-value store in the style of
/// ZooKeeper or etcd.
///
/// Paths are absolute and `/`-separated. The sequential counter of a parent
/// advances on every child creation, sequential or not, so a sequential
/// suffix is never reused under the same parent.
///
/// Implementations report connectivity failures as
/// [`Error::CoordinatorUnavailable`](crate::Error::CoordinatorUnavailable).
pub trait CoordinationBackend: Send + Sync + 'static {
    /// Lists the names (not paths) of the direct children of `path`.
    ///
    /// # Errors
    ///
    /// [`Error::NoNode`](crate::Error::NoNode) if `path` does not exist.
    fn children(&self, path: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Reads a node.
    ///
    /// # Errors
    ///
    /// [`Error::NoNode`](crate::Error::NoNode) if `path` does not exist.
    fn node(&self, path: &str) -> impl Future<Output = Result<NodeData>> + Send;

    /// Creates a node, creating missing parents with empty payloads, and
    /// returns the path actually created.
    ///
    /// # Errors
    ///
    /// [`Error::NodeExists`](crate::Error::NodeExists) if the final path is
    /// taken.
    fn create(
        &self,
        path: &str,
        payload: Vec<u8>,
        mode: CreateMode,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Replaces a node's payload if its version still equals
    /// `expected_version` (or unconditionally with [`ANY_VERSION`]).
    ///
    /// # Errors
    ///
    /// [`Error::NoNode`](crate::Error::NoNode) or
    /// [`Error::BadVersion`](crate::Error::BadVersion).
    fn set(
        &self,
        path: &str,
        payload: Vec<u8>,
        expected_version: i32,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<B: CoordinationBackend> CoordinationBackend for Arc<B> {
    fn children(&self, path: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
        (**self).children(path)
    }

    fn node(&self, path: &str) -> impl Future<Output = Result<NodeData>> + Send {
        (**self).node(path)
    }

    fn create(
        &self,
        path: &str,
        payload: Vec<u8>,
        mode: CreateMode,
    ) -> impl Future<Output = Result<String>> + Send {
        (**self).create(path, payload, mode)
    }

    fn set(
        &self,
        path: &str,
        payload: Vec<u8>,
        expected_version: i32,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).set(path, payload, expected_version)
    }
}
