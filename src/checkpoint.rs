//! Gating computations whose output decides the shape of the graph.
//!
//! A checkpoint produces a plain text artifact with one identifier per line.
//! The [`CheckpointExecutor`] runs every checkpoint identity at most once per
//! run. Callers asking for an identity that is already in flight wait for that
//! execution instead of starting their own.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::ArcStr;
use crate::error::{CheckpointIoError, SharedError};
use crate::target::{Target, TargetId};
use crate::utils::panic_error;

/// The ordered identifiers a checkpoint discovered.
///
/// Repeated identifiers are kept; they map onto the same downstream target and
/// collapse there.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveredIds(Arc<[ArcStr]>);

impl DiscoveredIds {
    /// Parses the checkpoint artifact format: one identifier per line,
    /// surrounding whitespace trimmed, blank lines skipped.
    pub fn parse(text: &str) -> Self {
        Self(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ArcStr::from)
                .collect(),
        )
    }

    pub fn read(path: &Utf8Path) -> Result<Self, CheckpointIoError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CheckpointIoError::Missing(path.to_owned()))
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                Err(CheckpointIoError::Parse(path.to_owned()))
            }
            Err(e) => Err(CheckpointIoError::Read(path.to_owned(), Arc::new(e))),
        }
    }

    /// Writes identifiers in the checkpoint artifact format.
    pub fn write<I, S>(path: &Utf8Path, ids: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        for id in ids {
            text.push_str(id.as_ref().trim());
            text.push('\n');
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(path, text)
    }
}

impl Deref for DiscoveredIds {
    type Target = [ArcStr];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

type Outcome = Result<DiscoveredIds, CheckpointIoError>;

/// One in-flight or finished execution.
struct Slot {
    target: Target,
    artifact: Utf8PathBuf,
    outcome: OnceLock<Outcome>,
}

/// Runs checkpoints at most once per identity and remembers their output for
/// the rest of the run.
///
/// A fresh executor starts a fresh epoch: the same identity may then be
/// executed again and discover a different list.
#[derive(Default)]
pub struct CheckpointExecutor {
    slots: Mutex<HashMap<TargetId, Arc<Slot>>>,
}

impl CheckpointExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure `target` was executed and returns what it discovered.
    ///
    /// `compute` is expected to write the checkpoint artifact to `artifact`.
    /// It runs for the first caller only; concurrent callers block until that
    /// execution finishes and share its outcome, failures and panics included.
    pub fn ensure_executed<F>(
        &self,
        target: &Target,
        artifact: &Utf8Path,
        compute: F,
    ) -> Result<DiscoveredIds, CheckpointIoError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let slot = self
            .slots
            .lock()
            .unwrap()
            .entry(target.id())
            .or_insert_with(|| {
                Arc::new(Slot {
                    target: target.clone(),
                    artifact: artifact.to_owned(),
                    outcome: OnceLock::new(),
                })
            })
            .clone();

        slot.outcome
            .get_or_init(|| {
                tracing::debug!(checkpoint = %slot.target, "executing checkpoint");

                std::panic::catch_unwind(AssertUnwindSafe(compute))
                    .unwrap_or_else(|panic| Err(panic_error(&*panic)))
                    .map_err(|e| {
                        CheckpointIoError::Computation(slot.target.to_string(), SharedError::from(e))
                    })
                    .and_then(|()| DiscoveredIds::read(&slot.artifact))
                    .inspect(|ids| {
                        tracing::info!(
                            checkpoint = %slot.target,
                            discovered = ids.len(),
                            "checkpoint done"
                        );
                    })
            })
            .clone()
    }

    /// The list a finished checkpoint discovered.
    ///
    /// Fails if the checkpoint was never executed, is still running, or its
    /// artifact could not be read.
    pub fn read(&self, id: TargetId) -> Result<DiscoveredIds, CheckpointIoError> {
        let slot = self.slots.lock().unwrap().get(&id).cloned();

        match slot.as_ref().and_then(|slot| slot.outcome.get()) {
            Some(outcome) => outcome.clone(),
            None => Err(CheckpointIoError::NotExecuted(match &slot {
                Some(slot) => slot.target.to_string(),
                None => id.to_string(),
            })),
        }
    }

    /// Like [`CheckpointExecutor::read`], but only for successful checkpoints
    /// and without an error.
    pub fn discovered(&self, id: TargetId) -> Option<DiscoveredIds> {
        self.read(id).ok()
    }

    /// Whether `id` finished, successfully or not.
    pub fn is_done(&self, id: TargetId) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|slot| slot.outcome.get().is_some())
    }
}
