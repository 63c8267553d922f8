//! Plot database layer for the drone plot replication network.
//!
//! This crate owns everything a node knows about observations:
//!
//! - [`plot`] — the [`DronePlot`](plot::DronePlot) record, its flags, and
//!   the fixed-width wire form replication batches are built from.
//! - [`store`] — the in-memory [`PlotDb`](store::PlotDb) the simulator
//!   feeds and the replication driver drains.
//! - [`deconflict`] — the [`Deconflictor`](deconflict::Deconflictor) pass
//!   that reconciles duplicate observations stamped by drifted clocks and
//!   elects the master clock node.
//! - [`error`] — the crate-wide error enum.

pub mod deconflict;
pub mod error;
pub mod plot;
pub mod store;

pub use {
    deconflict::Deconflictor,
    error::DbError,
    plot::{DronePlot, FLAG_NEW, RECORD_SIZE},
    store::PlotDb,
};
