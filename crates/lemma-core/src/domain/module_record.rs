use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::diagnostics::ModuleDiagnostics;
use crate::domain::module_state::ModuleState;
use crate::types::{ModuleAddress, ServiceDescriptor};

/// Parsed module content as produced by the parsing collaborator.
///
/// The scheduler never looks inside; services downcast to the type their
/// parser produces.
#[derive(Clone)]
pub struct ModuleContent(Arc<dyn Any + Send + Sync>);

impl ModuleContent {
    /// Wrap parsed content
    pub fn new<T: Any + Send + Sync>(content: T) -> Self {
        Self(Arc::new(content))
    }

    /// Typed access to the content
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ModuleContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleContent(..)")
    }
}

/// Label table: label name to the element path it marks
pub type LabelTable = BTreeMap<String, String>;

/// An import declared by a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleReference {
    /// Label under which the importing module refers to the import
    pub label: String,
    /// Address of the imported module
    pub address: ModuleAddress,
}

impl ModuleReference {
    /// Create a reference
    pub fn new(label: impl Into<String>, address: impl Into<ModuleAddress>) -> Self {
        Self {
            label: label.into(),
            address: address.into(),
        }
    }
}

/// Opaque object from the logic engine recording which predicate and
/// function constants a module (transitively) defines.
pub trait ExistenceChecker: Send + Sync + fmt::Debug {
    /// Is a predicate with this name and argument count defined?
    fn predicate_exists(&self, name: &str, arguments: usize) -> bool;

    /// Is a function with this name and argument count defined?
    fn function_exists(&self, name: &str, arguments: usize) -> bool;
}

/// Per-module data. Only `StateManager` mutates it.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Identity
    pub(crate) address: ModuleAddress,
    /// The five stages
    pub(crate) state: ModuleState,
    /// Parsed content once loaded
    pub(crate) content: Option<ModuleContent>,
    /// Labels of the loaded content
    pub(crate) labels: LabelTable,
    /// Imports stored by the imports stage
    pub(crate) imports: Vec<ModuleReference>,
    /// Errors and warnings
    pub(crate) diagnostics: ModuleDiagnostics,
    /// Stored by the well-formedness stage for reuse by later checks
    pub(crate) existence_checker: Option<Arc<dyn ExistenceChecker>>,
    /// Service currently working on the module, for display only
    pub(crate) running_service: Option<ServiceDescriptor>,
    /// Set when the loading stage first left `Undefined`
    pub(crate) registered: bool,
    /// Creation timestamp
    pub(crate) created_at: DateTime<Utc>,
    /// Last change timestamp
    pub(crate) updated_at: DateTime<Utc>,
}

impl ModuleRecord {
    /// Create an empty record
    pub fn new(address: ModuleAddress) -> Self {
        let now = Utc::now();
        Self {
            address,
            state: ModuleState::default(),
            content: None,
            labels: LabelTable::new(),
            imports: Vec::new(),
            diagnostics: ModuleDiagnostics::default(),
            existence_checker: None,
            running_service: None,
            registered: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity
    #[inline]
    pub fn address(&self) -> &ModuleAddress {
        &self.address
    }

    /// Snapshot of the five stages
    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Parsed content, if loaded
    pub fn content(&self) -> Option<&ModuleContent> {
        self.content.as_ref()
    }

    /// Label table
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Imports
    pub fn imports(&self) -> &[ModuleReference] {
        &self.imports
    }

    /// Diagnostics
    pub fn diagnostics(&self) -> &ModuleDiagnostics {
        &self.diagnostics
    }

    /// Existence checker, if well-formedness succeeded
    pub fn existence_checker(&self) -> Option<Arc<dyn ExistenceChecker>> {
        self.existence_checker.clone()
    }

    /// Service currently working on the module
    pub fn running_service(&self) -> Option<&ServiceDescriptor> {
        self.running_service.as_ref()
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last change timestamp
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[inline]
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Drop everything a later loading pass recomputes
    pub(crate) fn clear_content(&mut self) {
        self.content = None;
        self.labels.clear();
        self.imports.clear();
        self.existence_checker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Parsed {
        title: String,
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = ModuleRecord::new(ModuleAddress::new("M012"));
        assert_eq!(record.address().as_str(), "M012");
        assert_eq!(record.state(), ModuleState::default());
        assert!(record.content().is_none());
        assert!(record.labels().is_empty());
        assert!(record.imports().is_empty());
        assert!(record.existence_checker().is_none());
        assert!(record.created_at() <= Utc::now());
    }

    #[test]
    fn test_content_downcast() {
        let content = ModuleContent::new(Parsed {
            title: "Logic".to_string(),
        });
        assert_eq!(content.downcast_ref::<Parsed>().unwrap().title, "Logic");
        assert!(content.downcast_ref::<String>().is_none());
        assert_eq!(format!("{:?}", content), "ModuleContent(..)");
    }
}
