//! Build requests and the per-build state shared along a chain of nested builds.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use weft_cache::{SourceHasher, Stamp};

use crate::pipeline::Phase;
use crate::renaming::Renaming;
use crate::unit::Generation;

/// The set of source files compiled together as one unit.
///
/// Compared by value: two builds of the same files share an identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceSet(BTreeSet<PathBuf>);

impl SourceSet {
    /// A set holding one file.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self(std::iter::once(path.into()).collect())
    }

    /// The files, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    /// The first file. Names the unit's module and output paths.
    pub fn primary(&self) -> Option<&Path> {
        self.0.iter().next().map(PathBuf::as_path)
    }

    /// Returns `true` if `path` is one of the files.
    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    /// Returns `true` if the two sets share a file.
    pub fn intersects(&self, other: &SourceSet) -> bool {
        self.0.iter().any(|p| other.0.contains(p))
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set has no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PathBuf> for SourceSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

/// Cancellation signal of one running build.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not yet canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the build to stop at its next phase boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer of build progress that may also request cancellation.
pub trait ProgressMonitor: Send + Sync {
    /// Called when a build reaches a phase boundary.
    fn worked(&self, _sources: &SourceSet, _phase: Phase) {}

    /// Polled at every phase boundary; `true` interrupts the build.
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Content snapshot used to tell whether two requests for the same sources
/// would build the same thing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSnapshot(BTreeMap<PathBuf, Stamp>);

/// A request to bring the unit of a source set up to date.
///
/// The processing stack and the progress monitor are transient: they are
/// carried along but take no part in equality.
#[derive(Clone)]
pub struct BuildRequest {
    /// The sources to compile.
    pub sources: SourceSet,
    /// In-memory source contents that replace the files on disk.
    pub edited: BTreeMap<PathBuf, String>,
    /// Renamings inherited from the importing unit, most recent first.
    pub renamings: Vec<Renaming>,
    /// Present when the sources are the output of a transformation.
    pub generation: Option<Generation>,
    /// Units currently being built along this chain, outermost first.
    pub processing: Vec<Arc<ActiveBuild>>,
    /// Optional progress observer.
    pub monitor: Option<Arc<dyn ProgressMonitor>>,
}

impl BuildRequest {
    /// A request for a single source file.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self::for_sources(SourceSet::single(source))
    }

    /// A request for a set of source files.
    pub fn for_sources(sources: SourceSet) -> Self {
        Self {
            sources,
            edited: BTreeMap::new(),
            renamings: Vec::new(),
            generation: None,
            processing: Vec::new(),
            monitor: None,
        }
    }

    /// Overrides the content of a file with in-memory text.
    pub fn with_edited(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.edited.insert(path.into(), text.into());
        self
    }

    /// Attaches a progress monitor.
    pub fn with_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Stamps of all edited sources, used in place of on-disk stamps.
    pub fn edited_stamps(&self) -> BTreeMap<PathBuf, Stamp> {
        self.edited
            .iter()
            .map(|(path, text)| (path.clone(), SourceHasher::stamp_text(text)))
            .collect()
    }

    /// Snapshot of the edited content of this request's own sources.
    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot(
            self.edited
                .iter()
                .filter(|(path, _)| self.sources.contains(path))
                .map(|(path, text)| (path.clone(), SourceHasher::stamp_text(text)))
                .collect(),
        )
    }

    /// Returns `true` if a build along this chain already processes `sources`.
    pub fn is_processing(&self, sources: &SourceSet) -> bool {
        self.processing.iter().any(|a| &a.sources == sources)
    }
}

impl PartialEq for BuildRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources
            && self.edited == other.edited
            && self.renamings == other.renamings
            && self.generation == other.generation
    }
}

impl Eq for BuildRequest {}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("sources", &self.sources)
            .field("edited", &self.edited.keys().collect::<Vec<_>>())
            .field("renamings", &self.renamings)
            .field("generation", &self.generation)
            .field("processing", &self.processing.len())
            .finish()
    }
}

/// A unit whose build is underway, as seen by the builds it triggers.
///
/// Units in an import cycle hand their generated base sources to an active
/// partner, which compiles them together with its own. Once the partner
/// starts its own compilation or gives up, it is closed and refuses further
/// delegations.
#[derive(Debug)]
pub struct ActiveBuild {
    /// Sources of the unit being built.
    pub sources: SourceSet,
    /// Where the unit's record will be written.
    pub dep_path: PathBuf,
    delegations: Mutex<Delegations>,
}

#[derive(Debug, Default)]
struct Delegations {
    files: BTreeMap<SourceSet, BTreeSet<PathBuf>>,
    closed: bool,
}

impl ActiveBuild {
    /// Registers a new active build.
    pub fn new(sources: SourceSet, dep_path: PathBuf) -> Self {
        Self {
            sources,
            dep_path,
            delegations: Mutex::new(Delegations::default()),
        }
    }

    /// Takes over the compilation of `files` on behalf of the unit `from`.
    /// Returns `false` if this build is closed.
    pub fn accept_delegation(&self, from: SourceSet, files: BTreeSet<PathBuf>) -> bool {
        let mut delegations = self.delegations.lock();
        if delegations.closed {
            return false;
        }
        delegations.files.entry(from).or_default().extend(files);
        true
    }

    /// Returns `true` if the unit of `sources` delegated its compilation here.
    pub fn is_delegate_of(&self, sources: &SourceSet) -> bool {
        self.delegations.lock().files.contains_key(sources)
    }

    /// Stops accepting delegations and returns every file handed over.
    pub fn close(&self) -> BTreeSet<PathBuf> {
        let mut delegations = self.delegations.lock();
        delegations.closed = true;
        delegations.files.values().flat_map(|files| files.iter().cloned()).collect()
    }

    /// Returns `true` once the build stopped accepting delegations.
    pub fn is_closed(&self) -> bool {
        self.delegations.lock().closed
    }

    /// Snapshot of the delegations accepted so far.
    pub fn delegations(&self) -> BTreeMap<SourceSet, BTreeSet<PathBuf>> {
        self.delegations.lock().files.clone()
    }
}
