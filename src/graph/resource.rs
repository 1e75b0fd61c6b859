//! Resource model: kinds, identifiers and desired attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Attribute map of a resource. Ordered so that diffs and output are stable.
pub type Attributes = BTreeMap<String, Value>;

/// Kinds of resources the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Serverless container service.
    ComputeService,
    /// Managed relational database instance.
    DatabaseInstance,
    /// Secret container whose value is generated by the provider.
    Secret,
    /// Runtime identity.
    ServiceAccount,
    /// Project-level IAM role binding.
    RoleBinding,
}

impl ResourceKind {
    /// Returns the kebab-case name used in ids and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ComputeService => "compute-service",
            Self::DatabaseInstance => "database-instance",
            Self::Secret => "secret",
            Self::ServiceAccount => "service-account",
            Self::RoleBinding => "role-binding",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute-service" => Ok(Self::ComputeService),
            "database-instance" => Ok(Self::DatabaseInstance),
            "secret" => Ok(Self::Secret),
            "service-account" => Ok(Self::ServiceAccount),
            "role-binding" => Ok(Self::RoleBinding),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a resource: its kind plus a name unique within that kind.
///
/// Serialized as `kind/name`, which is also the key format of the state file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
}

impl ResourceId {
    /// Creates a new resource id.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (kind, name) = value
            .split_once('/')
            .ok_or_else(|| format!("resource id '{value}' must be kind/name"))?;

        if name.is_empty() {
            return Err(format!("resource id '{value}' has an empty name"));
        }

        Ok(Self::new(kind.parse()?, name))
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A desired resource: attributes plus the resources it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier.
    pub id: ResourceId,
    /// Desired attributes, including sensitive ones.
    pub attributes: Attributes,
    /// Resources that must exist before this one.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    /// Attribute keys excluded from diffing and never persisted.
    #[serde(default)]
    pub sensitive: BTreeSet<String>,
}

impl Resource {
    /// Creates a resource with no attributes or dependencies.
    ///
    /// The resource name is also recorded as its `name` attribute.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        let id = ResourceId::new(kind, name);
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), Value::String(id.name.clone()));

        Self {
            id,
            attributes,
            depends_on: BTreeSet::new(),
            sensitive: BTreeSet::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Sets an attribute whose value is excluded from diffing.
    #[must_use]
    pub fn sensitive_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.sensitive.insert(key.to_string());
        self.attr(key, value)
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: &ResourceId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    /// Returns the attributes that take part in diffing and get persisted.
    #[must_use]
    pub fn diffable_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.sensitive.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.id.kind
    }
}
