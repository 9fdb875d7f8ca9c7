//! Failure taxonomy for the regeneration pipeline.
//!
//! All three failure kinds are recovered at the orchestrator boundary; none of
//! them may reach the host event loop.

use thiserror::Error;

use crate::scene_graph::{MaterialId, ObjectId};
use crate::script_diagnostics::ScriptDiagnostic;
use crate::text_source::SourceId;

/// A recoverable pipeline failure.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    /// The script raised (or failed to compile) during evaluation.
    #[error("{}", .diagnostic.message)]
    Parse {
        diagnostic: ScriptDiagnostic,
        /// Full formatted trace, including evaluator frames.
        trace: String,
        /// The part of `trace` that originates inside the user script, when found.
        script_trace: Option<String>,
    },

    /// An evaluated value could not be turned into host objects.
    #[error("Failed to build object `{binding}`; {message}")]
    Build { binding: String, message: String },

    /// The CAD kernel is unavailable, so the pipeline cannot run at all.
    #[error("{0}")]
    Install(String),
}

impl Failure {
    pub fn build(binding: impl Into<String>, message: impl Into<String>) -> Self {
        Failure::Build {
            binding: binding.into(),
            message: message.into(),
        }
    }

    /// The text shown to the user: the script-local trace when one was
    /// extracted, otherwise the full trace or message.
    pub fn user_text(&self) -> String {
        match self {
            Failure::Parse {
                trace,
                script_trace,
                ..
            } => script_trace.clone().unwrap_or_else(|| trace.clone()),
            other => other.to_string(),
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Failure::Parse { .. })
    }

    pub fn is_build(&self) -> bool {
        matches!(self, Failure::Build { .. })
    }
}

/// Errors raised by host scene calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("object {0:?} does not exist")]
    ObjectNotFound(ObjectId),

    #[error("material {0:?} does not exist")]
    MaterialNotFound(MaterialId),

    #[error("object {0:?} cannot be parented to itself or its descendant")]
    InvalidParent(ObjectId),

    #[error("object {0:?} has no mesh data to receive a material")]
    NoMesh(ObjectId),
}

/// Errors raised when binding scripts to roots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("root object {0:?} does not exist in the scene")]
    UnknownRoot(ObjectId),

    #[error("root object {0:?} has no script binding")]
    NotBound(ObjectId),

    #[error("text {0:?} is not in the text library")]
    UnknownScript(SourceId),
}
