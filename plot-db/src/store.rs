//! The in-memory plot store.
//!
//! One node owns exactly one [`PlotDb`]. The simulator appends freshly
//! observed plots with [`FLAG_NEW`] set, the replication driver appends
//! replicated-in plots without it, and the deconfliction pass rewrites
//! timestamps in place. Records are never removed by the core loop;
//! [`PlotDb::prune_identical`] is an explicit, separate operation.

use {
    crate::plot::DronePlot,
    std::collections::HashSet,
    std::slice,
};

/// A sortable, iterable sequence of plot records.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlotDb {
    plots: Vec<DronePlot>,
}

impl PlotDb {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record built from raw observation data.
    pub fn add_plot(
        &mut self,
        drone_id: u32,
        node_id: u32,
        timestamp: i64,
        latitude: f64,
        longitude: f64,
        flags: u16,
    ) {
        self.plots.push(DronePlot::new(
            drone_id, node_id, timestamp, latitude, longitude, flags,
        ));
    }

    /// Append an existing record.
    pub fn push(&mut self, plot: DronePlot) {
        self.plots.push(plot);
    }

    pub fn len(&self) -> usize {
        self.plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, DronePlot> {
        self.plots.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, DronePlot> {
        self.plots.iter_mut()
    }

    /// Stable ascending sort by timestamp. Records with equal timestamps
    /// keep their insertion order.
    pub fn sort_by_time(&mut self) {
        self.plots.sort_by_key(|p| p.timestamp);
    }

    pub(crate) fn plots_mut(&mut self) -> &mut [DronePlot] {
        &mut self.plots
    }

    /// Remove every record whose `(drone_id, latitude, longitude,
    /// timestamp)` duplicates an earlier record's, keeping the first
    /// occurrence. Useful after reconciliation has pulled duplicate
    /// observations onto a shared timestamp. Returns the number removed.
    pub fn prune_identical(&mut self) -> usize {
        let before = self.plots.len();
        let mut seen: HashSet<(u32, u64, u64, i64)> = HashSet::with_capacity(before);
        self.plots.retain(|p| {
            seen.insert((
                p.drone_id,
                p.latitude.to_bits(),
                p.longitude.to_bits(),
                p.timestamp,
            ))
        });
        before - self.plots.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
