//! Long-lived regularization session shared by the editor, the filter
//! subsystem and background sweeps.
//!
//! Read paths hand out `Arc` snapshots and never write; every mutation is an
//! explicit call (manual edit or auto-map run) that ends in one store
//! transaction followed by cache invalidation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::automap::{AutoMapReport, AutoMapper};
use crate::cache::SnapshotCache;
use crate::config::RegularizeConfig;
use crate::error::RegularizeError;
use crate::expand::{FilterSelection, QueryExpander};
use crate::hierarchy::{CanonicalHierarchy, HierarchyBuilder};
use crate::model::{
    CanonicalValue, CompletionStatus, DimensionKind, MappingKey, MappingKind, PairAssignment, PairKey,
    RegularizationMapping, UncuratedPair, ValueCatalog, ValueId,
};
use crate::pairs::UncuratedPairIndex;
use crate::predicate::SqlPredicate;
use crate::source::{MappingStore, RawRecordStore};
use crate::status::{CompletionStatusEngine, StatusBoard, StatusSummary};
use crate::Result;

/// One row of the pair listing shown to the editor.
#[derive(Debug, Clone, Serialize)]
pub struct PairOverview {
    #[serde(flatten)]
    pub pair: UncuratedPair,
    pub make_code: Option<String>,
    pub model_code: Option<String>,
    pub status: CompletionStatus,
}

/// Which pairs a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairScope {
    /// Every pair seen in untrusted years.
    #[default]
    Untrusted,
    /// Only pairs that never occur in trusted years.
    UncuratedOnly,
}

struct SessionInner {
    records: Arc<dyn RawRecordStore>,
    mappings: Arc<dyn MappingStore>,
    config: RegularizeConfig,
    catalog: SnapshotCache<ValueCatalog>,
    hierarchy: SnapshotCache<CanonicalHierarchy>,
    pairs: UncuratedPairIndex,
    statuses: SnapshotCache<StatusBoard>,
    seen_version: Mutex<Option<u64>>,
    auto_map_running: AtomicBool,
}

#[derive(Clone)]
pub struct RegularizationSession {
    inner: Arc<SessionInner>,
}

impl RegularizationSession {
    pub fn new(
        records: Arc<dyn RawRecordStore>,
        mappings: Arc<dyn MappingStore>,
        config: RegularizeConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                pairs: UncuratedPairIndex::new(Arc::clone(&records)),
                records,
                mappings,
                config,
                catalog: SnapshotCache::new("catalog"),
                hierarchy: SnapshotCache::new("hierarchy"),
                statuses: SnapshotCache::new("status board"),
                seen_version: Mutex::new(None),
                auto_map_running: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RegularizeConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Compare the store's data version with the last one seen and drop
    /// every derived snapshot if it moved. Returns whether it moved.
    pub fn refresh_if_stale(&self) -> Result<bool> {
        let version = self.inner.records.data_version()?;
        let mut seen = self.inner.seen_version.lock();
        if *seen == Some(version) {
            return Ok(false);
        }
        if seen.is_some() {
            log::info!("upstream data changed (version {version}); invalidating snapshots");
        }
        *seen = Some(version);
        drop(seen);
        self.invalidate_all();
        Ok(true)
    }

    pub fn invalidate_all(&self) {
        let inner = &self.inner;
        inner.catalog.invalidate();
        inner.hierarchy.invalidate();
        inner.pairs.invalidate();
        inner.statuses.invalidate();
    }

    pub fn catalog(&self) -> Result<Arc<ValueCatalog>> {
        self.refresh_if_stale()?;
        self.inner
            .catalog
            .get_or_rebuild(|| self.inner.records.value_catalog())
    }

    pub fn hierarchy(&self) -> Result<Arc<CanonicalHierarchy>> {
        let catalog = self.catalog()?;
        self.inner.hierarchy.get_or_rebuild(|| {
            let observations = self.inner.records.trusted_observations()?;
            HierarchyBuilder::new(&catalog, self.inner.config.auto_map.null_fuel_policy)
                .build(&observations)
        })
    }

    pub fn uncurated_pairs(&self) -> Result<Arc<Vec<UncuratedPair>>> {
        self.refresh_if_stale()?;
        self.inner.pairs.find_uncurated_pairs()
    }

    pub fn untrusted_pairs(&self) -> Result<Arc<Vec<UncuratedPair>>> {
        self.refresh_if_stale()?;
        self.inner.pairs.find_untrusted_pairs()
    }

    pub fn model_years_for_pair(&self, pair: PairKey) -> Result<Vec<ValueId>> {
        self.inner.pairs.model_years_for_pair(pair)
    }

    pub fn mappings_for_pair(&self, pair: PairKey) -> Result<Vec<RegularizationMapping>> {
        self.inner.mappings.mappings_for_pair(pair)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    fn status_engine(&self) -> CompletionStatusEngine<'_> {
        CompletionStatusEngine::new(self.inner.records.as_ref(), self.inner.mappings.as_ref())
    }

    /// Current status of one pair, read straight from the store.
    pub fn status_of(&self, pair: PairKey) -> Result<CompletionStatus> {
        self.status_engine().status(pair)
    }

    /// Board for display. Never blocks on a sweep: returns the fresh board,
    /// the O(1) empty-mapping board, or the last known good one.
    pub fn statuses(&self) -> Arc<StatusBoard> {
        if let Some(board) = self.inner.statuses.fresh() {
            return board;
        }
        let generation = self.inner.statuses.generation();
        match self.status_engine().quick_board() {
            Ok(Some(board)) => return self.inner.statuses.publish(generation, board),
            Ok(None) => {}
            Err(e) => log::warn!("status fast path failed: {e}"),
        }
        self.inner
            .statuses
            .latest()
            .map(|s| s.value)
            .unwrap_or_else(|| Arc::new(StatusBoard::AllUnassigned))
    }

    /// Full status sweep; publishes the board on success.
    pub fn sweep_statuses(&self) -> Result<Arc<StatusBoard>> {
        let pairs = self.untrusted_pairs()?;
        self.inner
            .statuses
            .rebuild(|| self.status_engine().full_board(&pairs))
    }

    pub fn spawn_status_sweep(&self) -> Result<JoinHandle<Result<StatusSummary>>> {
        let session = self.clone();
        spawn_named("catreg-status-sweep", move || {
            let board = session.sweep_statuses()?;
            let pairs = session.untrusted_pairs()?;
            let summary = board.summary(&pairs);
            log::info!(
                "status sweep done: {} complete, {} partial, {} unassigned",
                summary.complete,
                summary.partial,
                summary.unassigned
            );
            Ok(summary)
        })
    }

    /// Pair listing joined with the current board. Falls back to the last
    /// listing when the store cannot be read.
    pub fn pair_overview(&self, scope: PairScope) -> Result<Vec<PairOverview>> {
        let (listing, last) = match scope {
            PairScope::Untrusted => (self.untrusted_pairs(), self.inner.pairs.last_untrusted_pairs()),
            PairScope::UncuratedOnly => (self.uncurated_pairs(), self.inner.pairs.last_uncurated_pairs()),
        };
        let pairs = match listing {
            Ok(pairs) => pairs,
            Err(e) => match last {
                Some(pairs) => {
                    log::warn!("pair listing unavailable, showing last snapshot: {e}");
                    pairs
                }
                None => return Err(e),
            },
        };
        let catalog = self
            .catalog()
            .ok()
            .or_else(|| self.inner.catalog.latest().map(|s| s.value));
        let board = self.statuses();

        Ok(pairs
            .iter()
            .map(|p| {
                let code = |kind: DimensionKind, id: ValueId| {
                    catalog
                        .as_ref()
                        .and_then(|c| c.get(kind, id))
                        .map(|v| v.code.clone())
                };
                PairOverview {
                    make_code: code(DimensionKind::Make, p.pair.make_id),
                    model_code: code(DimensionKind::Model, p.pair.model_id),
                    status: board.status(p.pair),
                    pair: p.clone(),
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Auto-mapping
    // -----------------------------------------------------------------------

    /// Propose rows for every unmapped pair and insert them in one
    /// transaction. At most one run at a time.
    pub fn run_auto_map(&self) -> Result<AutoMapReport> {
        if self.inner.auto_map_running.swap(true, Ordering::SeqCst) {
            return Err(RegularizeError::Validation("auto-map is already running".into()));
        }
        let result = self.auto_map_once();
        self.inner.auto_map_running.store(false, Ordering::SeqCst);
        result
    }

    fn auto_map_once(&self) -> Result<AutoMapReport> {
        let hierarchy = self.hierarchy()?;
        let catalog = self.catalog()?;
        let pairs = self.untrusted_pairs()?;
        let existing = self.inner.mappings.mapped_pairs()?;

        log::info!("auto-map: examining {} pairs", pairs.len());
        let (batches, mut report) = AutoMapper::new(&self.inner.config.auto_map).propose(
            &hierarchy,
            &catalog,
            &pairs,
            &existing,
            Utc::now(),
        );

        let outcome = self.inner.mappings.insert_unmapped(&batches)?;
        report.pairs_inserted = outcome.pairs_inserted;
        report.rows_inserted = outcome.rows_inserted;
        report.pairs_skipped_at_commit = outcome.pairs_skipped;
        if outcome.rows_inserted > 0 {
            self.inner.statuses.invalidate();
        }

        log::info!(
            "auto-map: {} matched, {} proposed, {} inserted ({} rows)",
            report.pairs_matched,
            report.pairs_proposed,
            report.pairs_inserted,
            report.rows_inserted
        );
        Ok(report)
    }

    /// What the auto-mapper would assign to one pair, shown to an editor
    /// next to the pair's current rows. Nothing is written.
    pub fn suggest_assignment(&self, pair: PairKey) -> Result<Option<PairAssignment>> {
        let hierarchy = self.hierarchy()?;
        let catalog = self.catalog()?;
        Ok(AutoMapper::new(&self.inner.config.auto_map).propose_pair(&hierarchy, &catalog, pair))
    }

    /// Vehicle types an editor may pick for a canonical pair.
    pub fn selectable_vehicle_types(&self, canonical: PairKey) -> Result<Vec<CanonicalValue>> {
        let hierarchy = self.hierarchy()?;
        let catalog = self.catalog()?;
        Ok(hierarchy.selectable_vehicle_types(canonical, &catalog))
    }

    pub fn spawn_auto_map(&self) -> Result<JoinHandle<Result<AutoMapReport>>> {
        let session = self.clone();
        spawn_named("catreg-auto-map", move || session.run_auto_map())
    }

    // -----------------------------------------------------------------------
    // Manual edits
    // -----------------------------------------------------------------------

    /// Write the Wildcard row and Triplets of one pair atomically, last write
    /// wins per row key. Returns the rows written.
    pub fn save_assignment(&self, assignment: &PairAssignment) -> Result<Vec<RegularizationMapping>> {
        let coverage = self.require_pair(assignment.pair)?;
        let catalog = self.catalog()?;
        let hierarchy = self.hierarchy()?;

        require_canonical_pair(&catalog, assignment.canonical)?;
        if let Some(vehicle_type) = assignment.vehicle_type_id {
            catalog.require(DimensionKind::VehicleType, vehicle_type)?;
        }
        for (&model_year, &fuel_type) in &assignment.fuel_types {
            self.check_fuel(&catalog, &hierarchy, assignment.canonical, model_year, fuel_type)?;
        }

        let rows = assignment.to_mappings(Some(&coverage), Utc::now());
        self.inner.mappings.save_mappings(&rows)?;
        self.inner.statuses.invalidate();
        log::debug!("saved {} rows for {}", rows.len(), assignment.pair);
        Ok(rows)
    }

    /// Strict single-row insert.
    pub fn add_mapping(&self, row: &RegularizationMapping) -> Result<()> {
        self.require_pair(row.pair)?;
        let catalog = self.catalog()?;
        let hierarchy = self.hierarchy()?;

        require_canonical_pair(&catalog, row.canonical)?;
        match row.kind {
            MappingKind::Wildcard { vehicle_type_id } => {
                if let Some(vehicle_type) = vehicle_type_id {
                    catalog.require(DimensionKind::VehicleType, vehicle_type)?;
                }
            }
            MappingKind::Triplet {
                model_year_id,
                fuel_type_id,
            } => match fuel_type_id {
                Some(fuel_type) => {
                    self.check_fuel(&catalog, &hierarchy, row.canonical, model_year_id, fuel_type)?
                }
                None => {
                    catalog.require(DimensionKind::ModelYear, model_year_id)?;
                }
            },
        }

        self.inner.mappings.insert_mapping(row)?;
        self.inner.statuses.invalidate();
        Ok(())
    }

    pub fn remove_mapping(&self, key: &MappingKey) -> Result<bool> {
        let removed = self.inner.mappings.remove_mapping(key)?;
        if removed {
            self.inner.statuses.invalidate();
        }
        Ok(removed)
    }

    pub fn clear_pair(&self, pair: PairKey) -> Result<usize> {
        let removed = self.inner.mappings.clear_pair(pair)?;
        if removed > 0 {
            self.inner.statuses.invalidate();
        }
        Ok(removed)
    }

    fn require_pair(&self, pair: PairKey) -> Result<UncuratedPair> {
        self.inner
            .records
            .untrusted_pair(pair)?
            .ok_or_else(|| RegularizeError::NotFound(format!("{pair} has no untrusted records")))
    }

    fn check_fuel(
        &self,
        catalog: &ValueCatalog,
        hierarchy: &CanonicalHierarchy,
        canonical: PairKey,
        model_year_id: ValueId,
        fuel_type_id: ValueId,
    ) -> Result<()> {
        catalog.require(DimensionKind::ModelYear, model_year_id)?;
        let fuel = catalog.require(DimensionKind::FuelType, fuel_type_id)?;
        if !self.inner.config.validation.strict_fuel_types || fuel.is_unspecified() {
            return Ok(());
        }
        match hierarchy.fuel_allowed(canonical, model_year_id, fuel_type_id) {
            Some(false) => Err(RegularizeError::Validation(format!(
                "fuel type {} is not a canonical option for {canonical} in model year {model_year_id}",
                fuel.code
            ))),
            Some(true) | None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Filtering
    // -----------------------------------------------------------------------

    /// Expand a selection after checking every selected value exists.
    pub fn filter_predicate(&self, selection: &FilterSelection) -> Result<SqlPredicate> {
        let catalog = self.catalog()?;
        for (kind, values) in [
            (DimensionKind::Make, &selection.makes),
            (DimensionKind::Model, &selection.models),
            (DimensionKind::FuelType, &selection.fuel_types),
            (DimensionKind::VehicleType, &selection.vehicle_types),
        ] {
            for id in values {
                catalog.require(kind, *id)?;
            }
        }
        Ok(QueryExpander::expand_sql(selection))
    }
}

fn require_canonical_pair(catalog: &ValueCatalog, canonical: PairKey) -> Result<()> {
    catalog.require(DimensionKind::Make, canonical.make_id)?;
    catalog.require(DimensionKind::Model, canonical.model_id)?;
    Ok(())
}

fn spawn_named<T: Send + 'static>(
    name: &str,
    task: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<JoinHandle<Result<T>>> {
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let result = task();
            if let Err(e) = &result {
                log::warn!("{thread_name} abandoned, last snapshot kept: {e}");
            }
            result
        })
        .map_err(|e| RegularizeError::Computation(format!("failed to spawn {name}: {e}")))
}
