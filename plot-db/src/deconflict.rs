//! Timestamp deconfliction across skewed node clocks.
//!
//! Several nodes see the same drone at the same coordinates at nearly the
//! same true instant, but each stamps the observation with its own drifted
//! clock. This pass clusters such duplicate observations, pulls every
//! member of a cluster onto the cluster's latest timestamp, and elects a
//! master clock node whose normalized start phase anchors all future
//! passes.
//!
//! The election is a monotone lattice: `master_start_time` only ever grows
//! (take-the-max over candidate contributions), while per-node candidacy is
//! scoped to a single pass — a node disqualified in one cluster may be
//! reconsidered on the next invocation.
//!
//! The engine never fails; a pass over an unsuitable store simply changes
//! nothing.

use {
    crate::{
        plot::FLAG_NEW,
        store::PlotDb,
    },
    log::{debug, info},
    std::collections::HashSet,
};

/// Two observations of the same drone at the same position from different
/// nodes are the same physical observation when their timestamps differ by
/// strictly less than this.
pub const CLUSTER_WINDOW_SECS: i64 = 11;

/// The simulator produces one observation per drone every this many
/// seconds; all phase normalization is relative to this cadence.
pub const SIM_CADENCE_SECS: i64 = 5;

/// Upper end of the phase interval `(3, 8]` that [`floor_to_epoch`]
/// reduces large timestamps into.
pub const EPOCH_CEILING: i64 = 8;

/// A cluster maximum this far past the running reference is a genuine
/// cadence gap rather than skew.
const REF_JUMP_THRESHOLD: i64 = 13;

/// How far the running reference advances across a cadence gap.
const REF_JUMP_STEP: i64 = 6;

/// Reduce a timestamp to its phase against the simulator cadence.
///
/// Equivalent to repeatedly subtracting [`SIM_CADENCE_SECS`] while the
/// value exceeds [`EPOCH_CEILING`]: any input above the ceiling lands in
/// `(3, 8]`. Inputs at or below the ceiling — including negative ones,
/// which the engine does not otherwise produce — are returned unchanged.
pub fn floor_to_epoch(t: i64) -> i64 {
    if t <= EPOCH_CEILING {
        return t;
    }
    (t - (EPOCH_CEILING - SIM_CADENCE_SECS + 1)) % SIM_CADENCE_SECS
        + (EPOCH_CEILING - SIM_CADENCE_SECS + 1)
}

/// The deconfliction engine for one node's store.
///
/// Owns the master-clock election state that survives across passes. The
/// state is node-scoped, not process-scoped, so a test harness can run
/// several nodes in one process.
#[derive(Debug, Default)]
pub struct Deconflictor {
    /// Largest normalized start phase ever contributed by a candidate node.
    master_start_time: i64,
    /// The node that contributed `master_start_time`.
    master_clock_node: u32,
    /// Latched true once any candidate has contributed.
    start_time_was_set: bool,
}

impl Deconflictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest normalized start phase observed so far (0 until the first
    /// election).
    pub fn master_start_time(&self) -> i64 {
        self.master_start_time
    }

    /// The elected master clock node (0 until the first election).
    pub fn master_clock_node(&self) -> u32 {
        self.master_clock_node
    }

    /// Whether any election has happened yet.
    pub fn start_time_was_set(&self) -> bool {
        self.start_time_was_set
    }

    /// One deconfliction pass over `db`.
    ///
    /// Sorts the store by timestamp, clusters duplicate observations,
    /// rewrites every cluster onto its (reference-adjusted) maximum
    /// timestamp, and feeds the master-clock election. Locally produced
    /// records still flagged `NEW` are not yet authoritative and take no
    /// part.
    pub fn run(&mut self, db: &mut PlotDb) {
        db.sort_by_time();
        for plot in db.iter_mut() {
            plot.checked = false;
        }

        let mut overall_ref = if self.start_time_was_set {
            self.master_start_time
        } else {
            0
        };
        let ref_set = self.start_time_was_set;

        // Candidacy is per-pass: every node starts eligible and is struck
        // the first time it reports a stale timestamp inside a cluster.
        let mut disqualified: HashSet<u32> = HashSet::new();

        let plots = db.plots_mut();
        for i in 0..plots.len() {
            if plots[i].is_flag_set(FLAG_NEW) || plots[i].checked {
                continue;
            }
            plots[i].checked = true;

            // Gather the cluster: later records describing the same
            // physical observation from a different node.
            let mut cluster = vec![i];
            let pivot = plots[i].clone();
            for j in (i + 1)..plots.len() {
                if plots[j].is_flag_set(FLAG_NEW) {
                    continue;
                }
                if pivot.drone_id == plots[j].drone_id
                    && pivot.node_id != plots[j].node_id
                    && pivot.latitude == plots[j].latitude
                    && pivot.longitude == plots[j].longitude
                    && (pivot.timestamp - plots[j].timestamp).abs() < CLUSTER_WINDOW_SECS
                {
                    plots[j].checked = true;
                    cluster.push(j);
                }
            }

            let largest = cluster
                .iter()
                .map(|&k| plots[k].timestamp)
                .max()
                .unwrap_or(pivot.timestamp);

            // A node whose clock ran behind the cluster maximum can never
            // hold the master clock this pass.
            for &k in &cluster {
                if plots[k].timestamp < largest {
                    disqualified.insert(plots[k].node_id);
                }
            }

            // Surviving candidates bid their normalized start phase.
            for &k in &cluster {
                if disqualified.contains(&plots[k].node_id) {
                    continue;
                }
                let phase = floor_to_epoch(largest);
                if phase > self.master_start_time {
                    self.master_start_time = phase;
                    self.master_clock_node = plots[k].node_id;
                    self.start_time_was_set = true;
                    info!(
                        "master clock moved to node {} (start phase {})",
                        self.master_clock_node, self.master_start_time
                    );
                }
            }

            // Pin the cluster to the running reference once one exists:
            // a large overshoot means the reference fell behind a cadence
            // gap and must jump; any other disagreement defers to the
            // reference.
            let mut target = largest;
            if ref_set {
                if target > overall_ref + REF_JUMP_THRESHOLD {
                    overall_ref += REF_JUMP_STEP;
                } else if target != overall_ref {
                    target = overall_ref;
                }
            }

            for &k in &cluster {
                if plots[k].timestamp != target {
                    debug!(
                        "drone {} node {}: timestamp {} -> {}",
                        plots[k].drone_id, plots[k].node_id, plots[k].timestamp, target
                    );
                    plots[k].timestamp = target;
                }
            }

            overall_ref += SIM_CADENCE_SECS;
        }

        for plot in db.iter_mut() {
            plot.checked = false;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
