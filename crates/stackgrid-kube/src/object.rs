//! Schema-free cluster objects.
//!
//! A `ClusterObject` is a JSON document with a parsed group/version/kind and
//! the identity fields pulled out. Everything else (spec, status, metadata
//! extras) stays in the document and is reachable through accessors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClusterError, ClusterResult};

// ── Identity ──────────────────────────────────────────────────────

/// Group, version and kind. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` string (`apps/v1`, `v1`) into group and version.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Identity used to match objects across two manifests: kind plus name.
///
/// Namespace is deliberately absent; all objects of one stack live in a
/// single namespace and the diff verifies that separately.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub gvk: Gvk,
    pub name: String,
}

/// Full address of one object in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub gvk: Gvk,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(gvk: Gvk, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.gvk.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.gvk.kind, self.namespace, self.name)
        }
    }
}

// ── Object ────────────────────────────────────────────────────────

/// One entry of `status.conditions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub type_: String,
    pub status: String,
}

impl Condition {
    /// Whether this is condition `name` reporting true (case-insensitive both ways).
    pub fn is_true(&self, name: &str) -> bool {
        self.type_.eq_ignore_ascii_case(name) && self.status.eq_ignore_ascii_case("true")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ClusterObject {
    gvk: Gvk,
    namespace: String,
    name: String,
    doc: Map<String, Value>,
}

impl ClusterObject {
    /// Build from a JSON document. Requires `apiVersion`, `kind` and
    /// `metadata.name`; `metadata.namespace` is optional.
    pub fn from_value(value: Value) -> ClusterResult<Self> {
        let Value::Object(doc) = value else {
            return Err(ClusterError::InvalidObject(
                "object document is not a mapping".to_string(),
            ));
        };
        let api_version = str_field(&doc, "apiVersion")?;
        let kind = str_field(&doc, "kind")?;
        let metadata = doc
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| ClusterError::InvalidObject(format!("{kind} has no metadata")))?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ClusterError::InvalidObject(format!("{kind} has no metadata.name")))?
            .to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            gvk: Gvk::from_api_version(&api_version, &kind),
            namespace,
            name,
            doc,
        })
    }

    pub fn gvk(&self) -> &Gvk {
        &self.gvk
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            gvk: self.gvk.clone(),
            name: self.name.clone(),
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.gvk.clone(), self.namespace.clone(), self.name.clone())
    }

    /// Nested field lookup, e.g. `field(&["spec", "replicas"])`.
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.doc.get(*first)?, |value, segment| value.get(*segment))
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.field(&["metadata", "labels"])
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn phase(&self) -> Option<&str> {
        self.field(&["status", "phase"]).and_then(Value::as_str)
    }

    pub fn conditions(&self) -> Vec<Condition> {
        let Some(items) = self
            .field(&["status", "conditions"])
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|c| {
                Some(Condition {
                    type_: c.get("type")?.as_str()?.to_string(),
                    status: c.get("status")?.as_str()?.to_string(),
                })
            })
            .collect()
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions().iter().any(|c| c.is_true(name))
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.field(&["metadata", "resourceVersion"])
            .and_then(Value::as_str)
    }

    pub fn set_resource_version(&mut self, version: &str) {
        self.set_metadata("resourceVersion", Value::String(version.to_string()));
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
        self.set_metadata("namespace", Value::String(namespace.to_string()));
    }

    /// Replace `status` wholesale.
    pub fn set_status(&mut self, status: Value) {
        self.doc.insert("status".into(), status);
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.doc.clone())
    }

    pub fn to_yaml(&self) -> ClusterResult<String> {
        serde_yaml::to_string(&self.doc).map_err(|e| ClusterError::Parse(e.to_string()))
    }

    fn set_metadata(&mut self, key: &str, value: Value) {
        let metadata = self
            .doc
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        match metadata {
            Value::Object(map) => {
                map.insert(key.to_string(), value);
            }
            other => {
                let mut map = Map::new();
                map.insert(key.to_string(), value);
                *other = Value::Object(map);
            }
        }
    }
}

impl TryFrom<Value> for ClusterObject {
    type Error = ClusterError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<ClusterObject> for Value {
    fn from(object: ClusterObject) -> Self {
        Value::Object(object.doc)
    }
}

fn str_field(doc: &Map<String, Value>, field: &str) -> ClusterResult<String> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClusterError::InvalidObject(format!("missing {field}")))
}

// ── Manifests ─────────────────────────────────────────────────────

/// Parse a multi-document YAML manifest.
///
/// Empty documents are skipped. `*List` documents with an `items` array are
/// flattened into their items.
pub fn parse_manifest(text: &str) -> ClusterResult<Vec<ClusterObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(|e| ClusterError::Parse(e.to_string()))?;
        match value {
            Value::Null => continue,
            Value::Object(ref doc)
                if doc
                    .get("kind")
                    .and_then(Value::as_str)
                    .is_some_and(|k| k.ends_with("List"))
                    && doc.get("items").is_some_and(Value::is_array) =>
            {
                if let Some(Value::Array(items)) = doc.get("items") {
                    for item in items {
                        objects.push(ClusterObject::from_value(item.clone())?);
                    }
                }
            }
            other => objects.push(ClusterObject::from_value(other)?),
        }
    }
    Ok(objects)
}

/// Render objects back into a multi-document YAML manifest.
pub fn render_manifest(objects: &[ClusterObject]) -> ClusterResult<String> {
    let docs = objects
        .iter()
        .map(ClusterObject::to_yaml)
        .collect::<ClusterResult<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

// ── Label selectors ───────────────────────────────────────────────

/// Equality-based label selector (`a=b,c=d`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn parse(text: &str) -> ClusterResult<Self> {
        let mut terms = Vec::new();
        for term in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| ClusterError::InvalidObject(format!("bad label selector term '{term}'")))?;
            terms.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self { terms })
    }

    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            terms: labels
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
