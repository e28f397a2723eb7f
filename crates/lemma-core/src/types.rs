use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Address of a module. Two records with the same address are the same module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleAddress(String);

impl ModuleAddress {
    /// Create an address from its URL-like string form
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The address as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short name: the last path segment without extension
    pub fn name(&self) -> &str {
        let last = self.0.rsplit('/').next().unwrap_or(&self.0);
        match last.rfind('.') {
            Some(0) | None => last,
            Some(dot) => &last[..dot],
        }
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModuleAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a service process. Allocated monotonically by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes a service (plugin): a stable id plus human readable name and action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable identifier, used as the plugin registry key
    pub id: String,
    /// Display name
    pub name: String,
    /// What the service does, e.g. "check well-formedness"
    pub action: String,
}

impl ServiceDescriptor {
    /// Create a new descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Configuration bag handed to a service.
///
/// Keys and values are implementation defined; the scheduler forwards them
/// unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, serde_json::Value>,
}

impl Parameters {
    /// Create an empty parameter bag
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value lookup
    #[inline]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// String value lookup
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Boolean value lookup
    #[inline]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    /// Unsigned integer lookup
    #[inline]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(|v| v.as_u64())
    }

    /// Deserialize one entry into a typed value
    pub fn get_as<T>(&self, key: &str) -> Option<Result<T, serde_json::Error>>
    where
        T: DeserializeOwned,
    {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the bag has no entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    /// Create a parameter bag from any serializable map-like value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        let values = serde_json::from_value(serde_json::to_value(value)?)?;
        Ok(Self { values })
    }
}
