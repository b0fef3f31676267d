use std::sync::Arc;

use crate::cache::SnapshotCache;
use crate::model::{PairKey, UncuratedPair, ValueId};
use crate::source::RawRecordStore;
use crate::Result;

/// Cached pair listings over a [`RawRecordStore`]. Listings are rebuilt
/// after [`invalidate`](Self::invalidate); model-year lookups always go to
/// the store since the interactive path asks for one pair at a time.
pub struct UncuratedPairIndex {
    records: Arc<dyn RawRecordStore>,
    uncurated: SnapshotCache<Vec<UncuratedPair>>,
    untrusted: SnapshotCache<Vec<UncuratedPair>>,
}

impl UncuratedPairIndex {
    pub fn new(records: Arc<dyn RawRecordStore>) -> Self {
        Self {
            records,
            uncurated: SnapshotCache::new("uncurated pairs"),
            untrusted: SnapshotCache::new("untrusted pairs"),
        }
    }

    /// Pairs seen only in untrusted years.
    pub fn find_uncurated_pairs(&self) -> Result<Arc<Vec<UncuratedPair>>> {
        self.uncurated
            .get_or_rebuild(|| self.records.find_uncurated_pairs())
    }

    /// Every pair seen in untrusted years.
    pub fn find_untrusted_pairs(&self) -> Result<Arc<Vec<UncuratedPair>>> {
        self.untrusted
            .get_or_rebuild(|| self.records.find_untrusted_pairs())
    }

    /// Last uncurated listing, stale or not. Used when a rebuild fails.
    pub fn last_uncurated_pairs(&self) -> Option<Arc<Vec<UncuratedPair>>> {
        self.uncurated.latest().map(|s| s.value)
    }

    /// Last untrusted listing, stale or not. Used when a rebuild fails.
    pub fn last_untrusted_pairs(&self) -> Option<Arc<Vec<UncuratedPair>>> {
        self.untrusted.latest().map(|s| s.value)
    }

    pub fn model_years_for_pair(&self, pair: PairKey) -> Result<Vec<ValueId>> {
        self.records.model_years_for_pair(pair)
    }

    pub fn invalidate(&self) {
        self.uncurated.invalidate();
        self.untrusted.invalidate();
    }
}
