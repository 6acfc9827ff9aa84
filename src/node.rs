//! Node identity and the structured per-node record.

use crate::error::{Error, Result};
use crate::url::{get_value, set_value, Segment, Url};
use crate::value::{diff_values, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque node identifier with a canonical string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Constructs a `NodeId` from the leading segment of a URL.
    pub fn from_url(url: &Url) -> Self {
        NodeId(url.node_id.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// The `NodeId` reserved for the locally running instance.
pub fn self_id(id: &str) -> NodeId {
    NodeId::new(id)
}

/// A structured record with nested and repeated fields, each addressable by
/// a URL path relative to the node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub fields: BTreeMap<String, Value>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Node {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// A serializable snapshot. Callers never get the interior `Node` the
    /// store owns — this clone is the only thing that crosses the store
    /// boundary.
    pub fn message(&self) -> Node {
        self.clone()
    }

    fn root(&self) -> Value {
        Value::Record(self.fields.clone())
    }

    pub fn get_value(&self, url: &Url) -> Result<Value> {
        if url.segments.is_empty() {
            return Ok(self.root());
        }
        let root = self.root();
        get_value(&root, &url.segments).cloned()
    }

    pub fn set_value(&mut self, url: &Url, value: Value) -> Result<()> {
        if url.segments.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot SetValue on a bare node url".to_string(),
            ));
        }
        let mut root = self.root();
        set_value(&mut root, &url.segments, value)?;
        if let Value::Record(fields) = root {
            self.fields = fields;
        }
        Ok(())
    }

    /// Merges `patch`'s fields into `self`: fields the patch sets overwrite,
    /// fields it doesn't touch are preserved.
    pub fn merge(&mut self, patch: &Node) {
        let mut root = self.root();
        root.merge(&Value::Record(patch.fields.clone()));
        if let Value::Record(fields) = root {
            self.fields = fields;
        }
    }

    /// Returns the full URLs (`nodeID/field...`) whose values differ between
    /// `self` and `other`.
    pub fn diff(&self, other: &Node) -> Vec<String> {
        let mut relative = Vec::new();
        diff_values(
            "",
            Some(&self.root()),
            Some(&other.root()),
            &mut relative,
        );
        relative
            .into_iter()
            .map(|path| format!("{}/{}", self.id, path))
            .collect()
    }

    /// Sets a top-level scalar/enum/record field directly, without parsing a
    /// URL. Convenience used when constructing nodes programmatically (tests,
    /// config seeding).
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Convenience constructor mirroring `Segment::Field`-only paths, used by
/// callers that already have a node-relative dotted path string rather than
/// a full `Url`.
pub fn field_path(segments: &[&str]) -> Vec<Segment> {
    segments.iter().map(|s| Segment::Field(s.to_string())).collect()
}
