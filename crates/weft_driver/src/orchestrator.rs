//! Build orchestration: in-flight deduplication, reuse of consistent units,
//! and persisting the outcome of every pipeline run.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};
use weft_common::InternalError;

use crate::context::BuildContext;
use crate::error::DriverError;
use crate::pipeline::Pipeline;
use crate::request::{ActiveBuild, BuildRequest};
use crate::unit::{CompilationUnit, UnitState};

impl BuildContext {
    /// Brings the unit of `request.sources` up to date and returns it.
    ///
    /// A consistent persisted unit is returned without rebuilding. Otherwise
    /// the unit is rebuilt, persisted and returned, even if it failed; only
    /// an interrupted build and errors before the build starts come back as
    /// `Err`. Concurrent requests for the same sources are serialized, and a
    /// request whose edited content differs interrupts the running build.
    /// A dependency request that would wait on a build which in turn waits
    /// on the requesting chain fails with [`DriverError::ConcurrentCycle`],
    /// which the importing build treats as a circular import.
    #[instrument(level = "debug", skip_all, fields(sources = %request.sources))]
    pub fn build(&self, request: BuildRequest) -> Result<Arc<CompilationUnit>, DriverError> {
        if request.is_processing(&request.sources) {
            return Err(InternalError::new(format!("recursive build of {}", request.sources)).into());
        }
        let dep_path = self.env().dep_path_for(&request.sources);
        let active = Arc::new(ActiveBuild::new(request.sources.clone(), dep_path.clone()));
        let guard = self
            .in_flight
            .acquire(&request, &active, self.env().pending_timeout)?;

        if let Some(unit) = self.store.read(&dep_path) {
            if unit.sources == request.sources && self.store.is_consistent(&unit, &request.edited_stamps()) {
                debug!("unit is up to date");
                return Ok(unit);
            }
        }

        self.notify_starts(&request.sources);
        info!("building");

        let pipeline = Pipeline::new(self, &request, Arc::clone(&active), guard.cancel_token());
        let (mut unit, result) = pipeline.run(CompilationUnit::new(request.sources.clone(), dep_path));
        active.close();
        unit.delegations = active.delegations();
        match result {
            Ok(()) => unit.finish(),
            Err(DriverError::Interrupted) => {
                info!("build interrupted");
                return Err(DriverError::Interrupted);
            }
            Err(e) => {
                warn!("build aborted: {e}");
                unit.add_error(e.to_string());
                unit.state = UnitState::Failure;
            }
        }

        let unit = self.store.write(unit)?;
        debug!(state = ?unit.state, errors = unit.errors.len(), "unit persisted");
        self.notify_done(&unit);
        if let Err(e) = self.save_caches() {
            warn!("failed to save extension cache: {e}");
        }
        drop(guard);
        Ok(unit)
    }

    /// Builds independent requests in parallel.
    pub fn build_all(&self, requests: Vec<BuildRequest>) -> Vec<Result<Arc<CompilationUnit>, DriverError>> {
        requests.into_par_iter().map(|request| self.build(request)).collect()
    }
}
