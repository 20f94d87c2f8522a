//! Process-wide build state: the environment, toolchains, caches, the unit
//! store and the table of in-flight builds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};
use weft_cache::Cache;

use crate::env::Environment;
use crate::error::DriverError;
use crate::language::BaseLanguage;
use crate::listener::ProcessingListener;
use crate::request::{ActiveBuild, BuildRequest, CancelToken, InputSnapshot, SourceSet};
use crate::store::UnitStore;
use crate::toolchain::ExtensionToolchain;
use crate::unit::CompilationUnit;

/// How often a waiting request re-checks the in-flight table.
const PENDING_POLL: Duration = Duration::from_millis(100);

struct PendingBuild {
    snapshot: InputSnapshot,
    cancel: CancelToken,
    active: Arc<ActiveBuild>,
}

/// A request blocked on a running build.
struct Waiter {
    /// Sources whose slots the waiting thread holds further up its chain.
    chain: Vec<SourceSet>,
    wants: SourceSet,
}

#[derive(Default)]
struct Slots {
    runs: HashMap<SourceSet, PendingBuild>,
    waiters: HashMap<u64, Waiter>,
    next_waiter: u64,
}

impl Slots {
    /// Follows the wait-for edges starting at the holder of the request's
    /// sources. If they lead back to a slot on the request's own chain, the
    /// two builds import each other and waiting would never end; the holder
    /// of the wanted slot is returned as the cycle partner.
    fn cycle_partner(&self, request: &BuildRequest) -> Option<Arc<ActiveBuild>> {
        if request.processing.is_empty() {
            return None;
        }
        let mut frontier = vec![&request.sources];
        let mut seen = HashSet::new();
        while let Some(held) = frontier.pop() {
            if !seen.insert(held) {
                continue;
            }
            for waiter in self.waiters.values().filter(|w| w.chain.contains(held)) {
                if request.is_processing(&waiter.wants) {
                    return self.runs.get(&request.sources).map(|p| Arc::clone(&p.active));
                }
                frontier.push(&waiter.wants);
            }
        }
        None
    }
}

/// At most one build per source set runs at a time.
#[derive(Default)]
pub(crate) struct InFlightTable {
    slots: Mutex<Slots>,
    finished: Condvar,
}

impl InFlightTable {
    /// Waits until no build of the request's sources is running, then claims
    /// the slot for `active`. A running build with a different input snapshot
    /// is asked to stop first.
    ///
    /// If the running build is itself waiting, directly or through other
    /// builds, on a slot held by the request's own chain, the request fails
    /// with [`DriverError::ConcurrentCycle`] instead of waiting.
    pub(crate) fn acquire(
        &self,
        request: &BuildRequest,
        active: &Arc<ActiveBuild>,
        timeout: Duration,
    ) -> Result<InFlightGuard<'_>, DriverError> {
        let started = Instant::now();
        let snapshot = request.snapshot();
        let mut slots = self.slots.lock();
        let mut waiting = None;
        let outcome = loop {
            let Some(pending) = slots.runs.get(&request.sources) else {
                break Ok(());
            };
            if pending.snapshot != snapshot && !pending.cancel.is_canceled() {
                info!(sources = %request.sources, "interrupting in-flight build with outdated input");
                pending.cancel.cancel();
            }
            if let Some(id) = waiting.take() {
                slots.waiters.remove(&id);
            }
            if let Some(partner) = slots.cycle_partner(request) {
                info!(sources = %request.sources, "in-flight build waits on this chain, treating import as circular");
                break Err(DriverError::ConcurrentCycle { partner });
            }
            let waited = started.elapsed();
            if waited >= timeout {
                break Err(DriverError::PendingTimeout {
                    sources: request.sources.clone(),
                    waited,
                });
            }
            let id = slots.next_waiter;
            slots.next_waiter += 1;
            slots.waiters.insert(
                id,
                Waiter {
                    chain: request.processing.iter().map(|a| a.sources.clone()).collect(),
                    wants: request.sources.clone(),
                },
            );
            waiting = Some(id);
            debug!(sources = %request.sources, "waiting for in-flight build");
            self.finished
                .wait_for(&mut slots, PENDING_POLL.min(timeout - waited));
        };
        if let Some(id) = waiting {
            slots.waiters.remove(&id);
        }
        outcome?;

        let cancel = CancelToken::new();
        slots.runs.insert(
            request.sources.clone(),
            PendingBuild {
                snapshot,
                cancel: cancel.clone(),
                active: Arc::clone(active),
            },
        );
        Ok(InFlightGuard {
            table: self,
            sources: request.sources.clone(),
            cancel,
        })
    }

    /// The open in-flight build that took over the compilation of `sources`.
    pub(crate) fn delegate_of(&self, sources: &SourceSet) -> Option<Arc<ActiveBuild>> {
        self.slots
            .lock()
            .runs
            .values()
            .map(|pending| &pending.active)
            .find(|active| !active.is_closed() && active.is_delegate_of(sources))
            .cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().runs.len()
    }
}

/// Holds a source set's in-flight slot; releasing it wakes waiting requests.
pub(crate) struct InFlightGuard<'a> {
    table: &'a InFlightTable,
    sources: SourceSet,
    cancel: CancelToken,
}

impl InFlightGuard<'_> {
    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.table.slots.lock().runs.remove(&self.sources);
        self.table.finished.notify_all();
    }
}

/// Shared state of all builds in a process.
///
/// Cheap to share by reference across threads; every mutable part is
/// behind its own lock.
pub struct BuildContext {
    env: Environment,
    language: Arc<dyn BaseLanguage>,
    toolchain: Arc<dyn ExtensionToolchain>,
    pub(crate) cache: Mutex<Cache>,
    pub(crate) store: UnitStore,
    pub(crate) in_flight: InFlightTable,
    listeners: RwLock<Vec<Arc<dyn ProcessingListener>>>,
}

impl BuildContext {
    /// Opens the caches of `env` for the given language and toolchain.
    pub fn new(
        env: Environment,
        language: Arc<dyn BaseLanguage>,
        toolchain: Arc<dyn ExtensionToolchain>,
    ) -> Result<Self, DriverError> {
        let version = language.toolchain_version();
        let cache = Cache::load_or_create(&env.cache_dir, &version)?;
        let store = UnitStore::new(&env.out_dir, &version);
        Ok(Self {
            env,
            language,
            toolchain,
            cache: Mutex::new(cache),
            store,
            in_flight: InFlightTable::default(),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// The build environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The base language.
    pub fn language(&self) -> &dyn BaseLanguage {
        self.language.as_ref()
    }

    /// The extension toolchain.
    pub fn toolchain(&self) -> &dyn ExtensionToolchain {
        self.toolchain.as_ref()
    }

    /// The unit store.
    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    /// Registers a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn ProcessingListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn notify_starts(&self, sources: &SourceSet) {
        for listener in self.listeners.read().iter() {
            listener.processing_starts(sources);
        }
    }

    pub(crate) fn notify_done(&self, unit: &CompilationUnit) {
        for listener in self.listeners.read().iter() {
            listener.processing_done(unit);
        }
    }

    /// Persists the extension-module caches.
    pub fn save_caches(&self) -> Result<(), DriverError> {
        self.cache.lock().save()?;
        Ok(())
    }

    /// Deletes cached artifacts no entry references. Returns how many were removed.
    pub fn collect_garbage(&self) -> Result<usize, DriverError> {
        Ok(self.cache.lock().gc()?)
    }
}
