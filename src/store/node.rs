use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::errors::SnapshotError;
use crate::proto::TableNode;
use crate::proto::ValueType;
use crate::store::join_key;
use crate::value::TypedValue;

/// One path segment of the trie.
///
/// `value` is present only on nodes that were written explicitly; intermediate
/// nodes created on the way to a deeper key carry nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreNode {
    pub value: Option<TypedValue>,
    pub children: HashMap<String, StoreNode>,
}

impl StoreNode {
    pub fn child(
        &self,
        segments: &[&str],
    ) -> Option<&StoreNode> {
        segments.iter().try_fold(self, |node, segment| node.children.get(*segment))
    }

    pub fn child_mut(
        &mut self,
        segments: &[&str],
    ) -> Option<&mut StoreNode> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.children.get_mut(*segment))
    }

    /// Walk to `segments`, creating missing nodes.
    pub fn child_or_insert(
        &mut self,
        segments: &[&str],
    ) -> &mut StoreNode {
        segments.iter().fold(self, |node, segment| {
            node.children.entry((*segment).to_string()).or_default()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    /// Nodes in this subtree that hold a value, this node included.
    pub fn value_count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(StoreNode::value_count).sum::<usize>()
    }

    /// Flatten every value in this subtree under `prefix`.
    pub fn collect_values(
        &self,
        prefix: &str,
        out: &mut BTreeMap<String, TypedValue>,
    ) {
        if let Some(value) = &self.value {
            out.insert(prefix.to_string(), value.clone());
        }
        for (name, child) in &self.children {
            child.collect_values(&join_key(prefix, name), out);
        }
    }

    pub fn to_proto(&self) -> TableNode {
        TableNode {
            children: self
                .children
                .iter()
                .map(|(name, child)| (name.clone(), child.to_proto()))
                .collect(),
            value: self.value.as_ref().map(TypedValue::encode),
            r#type: self
                .value
                .as_ref()
                .map(|v| v.value_type())
                .unwrap_or(ValueType::Unknown) as i32,
        }
    }

    pub fn from_proto(
        path: &str,
        node: TableNode,
    ) -> Result<Self, SnapshotError> {
        let value = match node.value {
            Some(bytes) => {
                let value_type = ValueType::try_from(node.r#type).map_err(|_| SnapshotError::InvalidNode {
                    path: path.to_string(),
                    reason: format!("unknown type tag {}", node.r#type),
                })?;
                let value = TypedValue::decode(value_type, &bytes).map_err(|e| SnapshotError::InvalidNode {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                Some(value)
            }
            None => None,
        };

        let mut children = HashMap::with_capacity(node.children.len());
        for (name, child) in node.children {
            let child_path = join_key(path, &name);
            if crate::store::validate_name(&name).is_err() {
                return Err(SnapshotError::InvalidNode {
                    path: child_path,
                    reason: "invalid segment name".to_string(),
                });
            }
            let child = StoreNode::from_proto(&child_path, child)?;
            children.insert(name, child);
        }

        Ok(StoreNode { value, children })
    }
}
