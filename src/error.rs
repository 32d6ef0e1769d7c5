use std::fmt::Display;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::dimension::Dimension;

/// An `anyhow` error that can be cloned and handed to every waiter of a shared
/// computation.
#[derive(Debug, Clone)]
pub struct SharedError(pub(crate) Arc<anyhow::Error>);

impl Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl SharedError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }
}

impl From<anyhow::Error> for SharedError {
    fn from(e: anyhow::Error) -> Self {
        SharedError(Arc::new(e))
    }
}

impl PartialEq for SharedError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Top-level error of a sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Error while resolving the task graph:\n{0}")]
    Resolve(#[from] ResolveError),

    #[error("Invalid progress bar template:\n{0}")]
    Progress(#[from] indicatif::style::TemplateError),

    #[error("Couldn't initialize logging:\n{0}")]
    Logging(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config.\n{0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Base field 'scenario.{0}' must hold exactly one value, found {1}")]
    BaseNotFixed(&'static str, usize),

    #[error("Invalid wildcard constraint for '{0}'.\n{1}")]
    Constraint(String, regex::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("Value '{value}' does not match the grammar of '{dimension}'")]
    Grammar { dimension: Dimension, value: String },

    #[error("Rule '{rule}' requires dimension '{dimension}' but it is not assigned")]
    MissingDimension { rule: String, dimension: Dimension },

    #[error("Rule '{rule}' does not take dimension '{dimension}'")]
    UnexpectedDimension { rule: String, dimension: Dimension },
}

/// A target transitively requires itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cycle detected: {}", .path.join(" -> "))]
pub struct CycleError {
    /// Targets along the cycle, starting and ending with the same one.
    pub path: Vec<String>,
}

#[derive(Debug, Error, Clone)]
pub enum CheckpointIoError {
    #[error("Checkpoint '{0}' has not completed yet")]
    NotExecuted(String),

    #[error("Checkpoint '{0}' failed.\n{1}")]
    Computation(String, SharedError),

    #[error("Checkpoint artifact '{0}' is missing")]
    Missing(Utf8PathBuf),

    #[error("Couldn't read checkpoint artifact '{0}'.\n{1}")]
    Read(Utf8PathBuf, Arc<std::io::Error>),

    #[error("Checkpoint artifact '{0}' is not valid UTF-8 text")]
    Parse(Utf8PathBuf),
}

/// A pattern target was requested before its gating checkpoint finished.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Checkpoint '{checkpoint}' must be done before its pattern targets exist")]
pub struct UnresolvedCheckpointError {
    pub checkpoint: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceEstimationError {
    #[error("Target has no cluster count")]
    MissingClusters,

    #[error("Couldn't parse cluster count '{0}'")]
    Clusters(String),
}

#[derive(Debug, Error, Clone)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Unresolved(#[from] UnresolvedCheckpointError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointIoError),

    #[error("Rule '{0}' is not defined")]
    UnknownRule(String),

    #[error("Rule '{0}' is used as a checkpoint but does not produce identifiers")]
    NotCheckpoint(String),
}
