//! In-memory trie shared by every connection handler
//!
//! # Concurrency contract
//! The root sits behind a `parking_lot::RwLock`. Lookups share the read lock
//! and observe a consistent tree. Every mutation, whether value replacement,
//! node creation, subtree removal or rename, takes the write lock, so
//! structural changes from independent connections are serialised. No lock is
//! held across an `.await`.
//!
//! # Failure reporting
//! A malformed key is an error ([`KeyFormatError`]). Everything else, such as a
//! missing key or a taken rename target, is reported through the returned
//! `bool`/`Option`, so callers can tell "not found" from "malformed" from
//! "applied".

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Read;
use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use prost::Message;
use serde_json::Map;
use serde_json::Value as Json;
use tracing::debug;
use tracing::trace;

use crate::errors::KeyFormatError;
use crate::errors::SnapshotError;
use crate::proto::TableNode;
use crate::store::join_key;
use crate::store::split_key;
use crate::store::split_parent;
use crate::store::validate_key;
use crate::store::validate_name;
use crate::store::StoreNode;
use crate::value::TypedValue;

const JSON_CHILDREN: &str = "children";

#[derive(Debug, Default)]
pub struct TreeStore {
    root: RwLock<StoreNode>,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at `key`, creating intermediate nodes.
    ///
    /// Returns `true` when the value was applied.
    pub fn put(
        &self,
        key: &str,
        value: TypedValue,
    ) -> Result<bool, KeyFormatError> {
        let segments = validate_key(key)?;
        trace!(key, value_type = ?value.value_type(), "put");
        let mut root = self.root.write();
        root.child_or_insert(&segments).value = Some(value);
        Ok(true)
    }

    /// `None` when any segment is missing or the node holds no value.
    /// The empty key never holds a value.
    pub fn get(
        &self,
        key: &str,
    ) -> Result<Option<TypedValue>, KeyFormatError> {
        let segments = split_key(key)?;
        if segments.is_empty() {
            return Ok(None);
        }
        let root = self.root.read();
        Ok(root.child(&segments).and_then(|node| node.value.clone()))
    }

    /// Remove the node at `key` and its whole subtree. `delete("")` clears the
    /// store. Returns whether anything was removed.
    pub fn delete(
        &self,
        key: &str,
    ) -> Result<bool, KeyFormatError> {
        let segments = split_key(key)?;
        let mut root = self.root.write();

        let Some((last, parents)) = segments.split_last() else {
            let removed = !root.is_empty();
            *root = StoreNode::default();
            debug!("store cleared");
            return Ok(removed);
        };
        let removed = root
            .child_mut(parents)
            .and_then(|parent| parent.children.remove(*last))
            .is_some();
        trace!(key, removed, "delete");
        Ok(removed)
    }

    /// Move the node at `old_key` (value and subtree) to the sibling `new_name`.
    ///
    /// Returns `false` without touching the tree when `old_key` does not exist
    /// or `new_name` is already taken under the same parent.
    pub fn rename(
        &self,
        old_key: &str,
        new_name: &str,
    ) -> Result<bool, KeyFormatError> {
        Ok(self.rename_with_entries(old_key, new_name)?.is_some())
    }

    /// Same as [`rename`](Self::rename), but returns every value now reachable
    /// under the new key, collected under the same write lock as the move.
    pub fn rename_with_entries(
        &self,
        old_key: &str,
        new_name: &str,
    ) -> Result<Option<BTreeMap<String, TypedValue>>, KeyFormatError> {
        let segments = validate_key(old_key)?;
        validate_name(new_name)?;

        let Some((last, parents)) = segments.split_last() else {
            return Ok(None);
        };
        let mut root = self.root.write();
        let Some(parent) = root.child_mut(parents) else {
            return Ok(None);
        };
        if parent.children.contains_key(new_name) {
            return Ok(None);
        }
        let Some(node) = parent.children.remove(*last) else {
            return Ok(None);
        };
        let new_key = Self::sibling_key(old_key, new_name);
        let mut moved = BTreeMap::new();
        node.collect_values(&new_key, &mut moved);
        parent.children.insert(new_name.to_string(), node);
        debug!(old_key, new_name, moved = moved.len(), "renamed");
        Ok(Some(moved))
    }

    /// Immediate child names under `key`, or the top-level names for `""`.
    ///
    /// `None` when the prefix does not exist. The root always exists.
    pub fn list_children(
        &self,
        key: &str,
    ) -> Result<Option<BTreeSet<String>>, KeyFormatError> {
        let segments = split_key(key)?;
        let root = self.root.read();
        Ok(root
            .child(&segments)
            .map(|node| node.children.keys().cloned().collect()))
    }

    /// Number of nodes holding a value.
    pub fn size(&self) -> usize {
        self.root.read().value_count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }

    /// Every value at or below `prefix`, keyed by full key.
    pub fn entries(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, TypedValue>, KeyFormatError> {
        let segments = split_key(prefix)?;
        let mut out = BTreeMap::new();
        if let Some(node) = self.root.read().child(&segments) {
            node.collect_values(prefix, &mut out);
        }
        Ok(out)
    }

    pub fn clear(&self) {
        *self.root.write() = StoreNode::default();
    }

    /// Swap the whole tree for `other`'s contents in one step.
    pub fn replace_with(
        &self,
        other: TreeStore,
    ) {
        let fresh = other.root.into_inner();
        *self.root.write() = fresh;
    }

    pub fn snapshot_node(&self) -> StoreNode {
        self.root.read().clone()
    }

    /// Binary full-tree snapshot.
    pub fn serialize(&self) -> Vec<u8> {
        self.root.read().to_proto().encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let node = TableNode::decode(bytes)?;
        let root = StoreNode::from_proto("", node)?;
        Ok(Self {
            root: RwLock::new(root),
        })
    }

    /// Nested JSON rendering: each node is an object with optional `type`,
    /// `value` and `children` members.
    pub fn export_json(&self) -> Json {
        node_to_json(&self.root.read())
    }

    pub fn import_json(json: &Json) -> Result<Self, SnapshotError> {
        let root = node_from_json("", json)?;
        Ok(Self {
            root: RwLock::new(root),
        })
    }

    /// JSON export, zlib-compressed, then base64 encoded.
    pub fn export_compressed(&self) -> Result<String, SnapshotError> {
        let json = serde_json::to_vec(&self.export_json())?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        Ok(STANDARD.encode(compressed))
    }

    pub fn import_compressed(text: &str) -> Result<Self, SnapshotError> {
        let compressed = STANDARD.decode(text.trim())?;
        let mut json = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
        let json: Json = serde_json::from_slice(&json)?;
        Self::import_json(&json)
    }

    /// Full key of `new_name` placed next to `old_key`.
    pub(crate) fn sibling_key(
        old_key: &str,
        new_name: &str,
    ) -> String {
        let (parent, _) = split_parent(old_key);
        join_key(parent, new_name)
    }
}

fn node_to_json(node: &StoreNode) -> Json {
    let mut object = match node.value.as_ref().map(TypedValue::to_json) {
        Some(Json::Object(map)) => map,
        _ => Map::new(),
    };
    if !node.children.is_empty() {
        let children: Map<String, Json> = node
            .children
            .iter()
            .map(|(name, child)| (name.clone(), node_to_json(child)))
            .collect();
        object.insert(JSON_CHILDREN.to_string(), Json::Object(children));
    }
    Json::Object(object)
}

fn node_from_json(
    path: &str,
    json: &Json,
) -> Result<StoreNode, SnapshotError> {
    let invalid = |reason: String| SnapshotError::InvalidNode {
        path: path.to_string(),
        reason,
    };
    let object = json.as_object().ok_or_else(|| invalid("expected an object".to_string()))?;

    let value = if object.contains_key("type") {
        Some(TypedValue::from_json(json).map_err(|e| invalid(e.to_string()))?)
    } else {
        None
    };

    let mut node = StoreNode {
        value,
        ..Default::default()
    };
    if let Some(children) = object.get(JSON_CHILDREN) {
        let children = children
            .as_object()
            .ok_or_else(|| invalid("children must be an object".to_string()))?;
        for (name, child) in children {
            let child_path = join_key(path, name);
            validate_name(name).map_err(|e| SnapshotError::InvalidNode {
                path: child_path.clone(),
                reason: e.to_string(),
            })?;
            node.children.insert(name.clone(), node_from_json(&child_path, child)?);
        }
    }
    Ok(node)
}
