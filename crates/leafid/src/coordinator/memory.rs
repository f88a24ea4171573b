use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{
    Error, Result,
    coordinator::{ANY_VERSION, CoordinationBackend, CreateMode, NodeData},
};

#[derive(Debug)]
struct Node {
    payload: Vec<u8>,
    version: i32,
    children_created: i64,
}

/// A [`CoordinationBackend`] held in process memory.
///
/// Nodes live in one ordered map keyed by full path, so listing children is
/// a range scan. [`set_available`](Self::set_available) simulates losing the
/// connection.
#[derive(Debug)]
pub struct MemoryCoordinationBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    available: AtomicBool,
}

impl Default for MemoryCoordinationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinationBackend {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::CoordinatorUnavailable(
                "backend marked unavailable".into(),
            ))
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn insert_node(nodes: &mut BTreeMap<String, Node>, path: &str, payload: Vec<u8>) {
    if let Some(parent) = parent_of(path).and_then(|p| nodes.get_mut(p)) {
        parent.children_created += 1;
    }
    nodes.insert(
        path.to_owned(),
        Node {
            payload,
            version: 0,
            children_created: 0,
        },
    );
}

fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) {
    if let Some(parent) = parent_of(path) {
        if !nodes.contains_key(parent) {
            ensure_parents(nodes, parent);
            insert_node(nodes, parent, Vec::new());
        }
    }
}

impl CoordinationBackend for MemoryCoordinationBackend {
    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let nodes = self.nodes.lock();
        if !nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_owned()));
        }
        let prefix = format!("{path}/");
        Ok(nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| {
                let name = &key[prefix.len()..];
                (!name.contains('/')).then(|| name.to_owned())
            })
            .collect())
    }

    async fn node(&self, path: &str) -> Result<NodeData> {
        self.check_available()?;
        self.nodes
            .lock()
            .get(path)
            .map(|node| NodeData {
                payload: node.payload.clone(),
                version: node.version,
            })
            .ok_or_else(|| Error::NoNode(path.to_owned()))
    }

    async fn create(&self, path: &str, payload: Vec<u8>, mode: CreateMode) -> Result<String> {
        self.check_available()?;
        if !path.starts_with('/') || path.len() < 2 {
            return Err(Error::InvalidNodeName(path.to_owned()));
        }

        let mut nodes = self.nodes.lock();
        ensure_parents(&mut nodes, path);
        let path = match mode {
            CreateMode::Persistent => path.to_owned(),
            CreateMode::PersistentSequential => {
                let sequence = parent_of(path)
                    .and_then(|parent| nodes.get(parent))
                    .map_or(0, |parent| parent.children_created);
                format!("{path}{sequence:010}")
            }
        };
        if nodes.contains_key(&path) {
            return Err(Error::NodeExists(path));
        }
        insert_node(&mut nodes, &path, payload);
        Ok(path)
    }

    async fn set(&self, path: &str, payload: Vec<u8>, expected_version: i32) -> Result<()> {
        self.check_available()?;
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| Error::NoNode(path.to_owned()))?;
        if expected_version != ANY_VERSION && expected_version != node.version {
            return Err(Error::BadVersion {
                path: path.to_owned(),
                expected: expected_version,
                actual: node.version,
            });
        }
        node.payload = payload;
        node.version += 1;
        Ok(())
    }
}
