//! Structured error types shared across runman crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`RunmanError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, run indices, stages, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the sweep engine.
///
/// Only [`RunmanError::Configuration`] is fatal to a whole sweep. The
/// remaining families are contained by the run or persistence step that
/// raised them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum RunmanError {
    /// Documents that do not parse into any recognised shape.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// Dotted parameter paths that do not resolve on the pipeline.
    #[error("parameter path error: {0}")]
    ParameterPath(ErrorInfo),
    /// Failures raised while advancing a pipeline or computing metrics.
    #[error("run execution error: {0}")]
    RunExecution(ErrorInfo),
    /// Failures writing run artefacts.
    #[error("persistence error: {0}")]
    Persistence(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl RunmanError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            RunmanError::Configuration(info)
            | RunmanError::ParameterPath(info)
            | RunmanError::RunExecution(info)
            | RunmanError::Persistence(info)
            | RunmanError::Serde(info) => info,
        }
    }

    /// Short family label used in status records and log lines.
    pub fn family(&self) -> &'static str {
        match self {
            RunmanError::Configuration(_) => "configuration",
            RunmanError::ParameterPath(_) => "parameter-path",
            RunmanError::RunExecution(_) => "run-execution",
            RunmanError::Persistence(_) => "persistence",
            RunmanError::Serde(_) => "serde",
        }
    }

    /// Returns true when the error must abort the whole sweep.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunmanError::Configuration(_))
    }

    /// Re-tags the error as a run execution failure, keeping its payload.
    pub fn into_run_execution(self) -> Self {
        match self {
            RunmanError::RunExecution(info) => RunmanError::RunExecution(info),
            other => {
                let family = other.family();
                let info = other.info().clone().with_context("source_family", family);
                RunmanError::RunExecution(info)
            }
        }
    }
}
