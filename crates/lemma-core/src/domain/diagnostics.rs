//! Errors and warnings collected while a module moves through the pipeline.
//!
//! Diagnostics are values. They are accumulated and returned as lists and
//! never raised.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Blocks the stage that produced it
    Error,
    /// Informational, never blocks
    Warning,
}

/// One error or warning about a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning
    pub severity: Severity,
    /// Numeric code of the producing collaborator
    pub code: u32,
    /// Message text
    pub message: String,
    /// Location inside the module, if known
    pub location: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            location: None,
        }
    }

    /// Create a warning diagnostic
    pub fn warning(code: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            location: None,
        }
    }

    /// Attach a location
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// True for errors
    #[inline]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.location {
            Some(location) => write!(f, "{} {} at {}: {}", kind, self.code, location, self.message),
            None => write!(f, "{} {}: {}", kind, self.code, self.message),
        }
    }
}

/// Errors and warnings reported by one plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResults {
    /// Errors
    pub errors: Vec<Diagnostic>,
    /// Warnings
    pub warnings: Vec<Diagnostic>,
}

/// Diagnostics of one module: the pipeline list plus a per-plugin table.
///
/// Plugin results never alter the five core stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDiagnostics {
    pipeline: Vec<Diagnostic>,
    plugins: BTreeMap<String, PluginResults>,
}

impl ModuleDiagnostics {
    /// Replace the pipeline diagnostics
    pub fn set_pipeline(&mut self, diagnostics: Vec<Diagnostic>) {
        self.pipeline = diagnostics;
    }

    /// Drop all pipeline diagnostics
    pub fn clear_pipeline(&mut self) {
        self.pipeline.clear();
    }

    /// Pipeline diagnostics only
    pub fn pipeline(&self) -> &[Diagnostic] {
        &self.pipeline
    }

    /// Append results reported by `plugin`
    pub fn add_plugin_results(
        &mut self,
        plugin: &str,
        errors: Vec<Diagnostic>,
        warnings: Vec<Diagnostic>,
    ) {
        let entry = self.plugins.entry(plugin.to_string()).or_default();
        entry.errors.extend(errors);
        entry.warnings.extend(warnings);
    }

    /// Drop results reported by `plugin`
    pub fn clear_plugin_results(&mut self, plugin: &str) {
        self.plugins.remove(plugin);
    }

    /// Drop every plugin's results
    pub fn clear_all_plugin_results(&mut self) {
        self.plugins.clear();
    }

    /// Results of one plugin
    pub fn plugin_results(&self, plugin: &str) -> Option<&PluginResults> {
        self.plugins.get(plugin)
    }

    /// Pipeline errors followed by plugin errors
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.pipeline
            .iter()
            .filter(|d| d.is_error())
            .chain(self.plugins.values().flat_map(|r| r.errors.iter()))
            .cloned()
            .collect()
    }

    /// Pipeline warnings followed by plugin warnings
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.pipeline
            .iter()
            .filter(|d| !d.is_error())
            .chain(self.plugins.values().flat_map(|r| r.warnings.iter()))
            .cloned()
            .collect()
    }

    /// True if any error exists
    pub fn has_errors(&self) -> bool {
        self.pipeline.iter().any(Diagnostic::is_error)
            || self.plugins.values().any(|r| !r.errors.is_empty())
    }

    /// True if any warning exists
    pub fn has_warnings(&self) -> bool {
        self.pipeline.iter().any(|d| !d.is_error())
            || self.plugins.values().any(|r| !r.warnings.is_empty())
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.pipeline.clear();
        self.plugins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_pipeline_and_plugins() {
        let mut diagnostics = ModuleDiagnostics::default();
        diagnostics.set_pipeline(vec![
            Diagnostic::error(100, "unknown predicate"),
            Diagnostic::warning(200, "unused label"),
        ]);
        diagnostics.add_plugin_results(
            "heuristic",
            vec![Diagnostic::error(300, "counter model found").at("proposition 3")],
            vec![],
        );

        let errors = diagnostics.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, 100);
        assert_eq!(errors[1].code, 300);
        assert_eq!(diagnostics.warnings().len(), 1);
        assert!(diagnostics.has_errors());
        assert!(diagnostics.has_warnings());
    }

    #[test]
    fn test_clear_plugin_results_keeps_pipeline() {
        let mut diagnostics = ModuleDiagnostics::default();
        diagnostics.set_pipeline(vec![Diagnostic::warning(1, "w")]);
        diagnostics.add_plugin_results("a", vec![Diagnostic::error(2, "e")], vec![]);
        diagnostics.add_plugin_results("a", vec![], vec![Diagnostic::warning(3, "w")]);

        let results = diagnostics.plugin_results("a").unwrap();
        assert_eq!(results.errors.len(), 1);
        assert_eq!(results.warnings.len(), 1);

        diagnostics.clear_plugin_results("a");
        assert!(!diagnostics.has_errors());
        assert!(diagnostics.has_warnings());

        diagnostics.clear();
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::error(7, "bad").at("axiom 1");
        assert_eq!(d.to_string(), "error 7 at axiom 1: bad");
        assert_eq!(Diagnostic::warning(8, "meh").to_string(), "warning 8: meh");
    }
}
