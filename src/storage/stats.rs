use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Shape of an index lookup, used as the statistics key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexStatKey {
    /// Index name.
    pub index: String,
    /// Number of key fields bound by the lookup.
    pub key_fields: usize,
    /// The last bound field is a range.
    pub range: bool,
    /// A second bound on the last field was present.
    pub additional_range: bool,
}

impl IndexStatKey {
    /// Creates a statistics key.
    pub fn new(index: impl Into<String>, key_fields: usize, range: bool, additional_range: bool) -> Self {
        Self {
            index: index.into(),
            key_fields,
            range,
            additional_range,
        }
    }
}

/// Historical lookup statistics.
pub trait StatsStore: Send + Sync {
    /// Expected entries for a lookup shape, or `None` when never observed.
    fn index_stat(&self, key: &IndexStatKey) -> Option<u64>;

    /// Records the entry count observed by a completed scan.
    fn push_index_stat(&self, key: IndexStatKey, observed: u64);
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    average: u64,
    samples: u64,
}

/// In-memory [`StatsStore`] keeping a bounded running average per lookup shape.
#[derive(Debug, Default)]
pub struct QueryStats {
    entries: RwLock<FxHashMap<IndexStatKey, Sample>>,
}

impl QueryStats {
    /// Samples after which older observations stop gaining weight.
    const WINDOW: u64 = 10;

    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct lookup shapes observed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when nothing has been observed.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forgets all observations.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl StatsStore for QueryStats {
    fn index_stat(&self, key: &IndexStatKey) -> Option<u64> {
        self.entries.read().get(key).map(|sample| sample.average)
    }

    fn push_index_stat(&self, key: IndexStatKey, observed: u64) {
        trace!(index = %key.index, fields = key.key_fields, observed, "index stat");
        let mut entries = self.entries.write();
        let sample = entries.entry(key).or_insert(Sample {
            average: observed,
            samples: 0,
        });
        let weight = sample.samples.min(Self::WINDOW - 1);
        sample.average = (sample.average.saturating_mul(weight) + observed) / (weight + 1);
        sample.samples += 1;
    }
}
