//! The drone plot record and its fixed-width wire form.
//!
//! Every record crosses the wire as a bincode encoding of the five
//! persistent fields in declaration order (little-endian, fixed-width
//! integers), giving a constant [`RECORD_SIZE`] image. The transient
//! bookkeeping fields (`flags`, `checked`) never leave the node.
//!
//! Replication batches are length-prefixed the same way the rest of the
//! wire protocol is: a `u32-le` record count followed by `count` record
//! images back to back.

use {
    crate::error::{DbError, Result},
    serde::{Deserialize, Serialize},
};

/// Flag bit: this record was produced by the local simulator and has not
/// yet been marshalled for outbound replication.
pub const FLAG_NEW: u16 = 1 << 0;

/// Fixed wire width of one serialized record:
/// `drone_id (4) + node_id (4) + timestamp (8) + latitude (8) + longitude (8)`.
pub const RECORD_SIZE: usize = 32;

/// Width of the record-count prefix on a replication batch.
pub const COUNT_PREFIX_SIZE: usize = 4;

/// One position observation of one drone by one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DronePlot {
    /// Stable identifier of the observed drone.
    pub drone_id: u32,
    /// Identifier of the observing node.
    pub node_id: u32,
    /// Observation time in the observer's local clock (integer seconds
    /// from an arbitrary per-node epoch).
    pub timestamp: i64,
    /// Observed latitude. Compared by exact bit equality — the simulator
    /// emits identical bit patterns to every node.
    pub latitude: f64,
    /// Observed longitude. Same equality contract as `latitude`.
    pub longitude: f64,
    /// Local bookkeeping bits ([`FLAG_NEW`] and friends). Not replicated.
    #[serde(skip)]
    pub flags: u16,
    /// Scratch marker used within a single deconfliction pass. Not
    /// replicated, cleared on every pass boundary.
    #[serde(skip)]
    pub checked: bool,
}

impl DronePlot {
    /// Create a record with the given observation data and flags.
    pub fn new(
        drone_id: u32,
        node_id: u32,
        timestamp: i64,
        latitude: f64,
        longitude: f64,
        flags: u16,
    ) -> Self {
        Self {
            drone_id,
            node_id,
            timestamp,
            latitude,
            longitude,
            flags,
            checked: false,
        }
    }

    /// Whether every bit in `mask` is set on this record.
    pub fn is_flag_set(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    /// Set the bits in `mask`.
    pub fn set_flags(&mut self, mask: u16) {
        self.flags |= mask;
    }

    /// Clear the bits in `mask`.
    pub fn clear_flags(&mut self, mask: u16) {
        self.flags &= !mask;
    }

    /// Serialize the persistent fields into their fixed-width wire image.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        debug_assert_eq!(bytes.len(), RECORD_SIZE);
        Ok(bytes)
    }

    /// Deserialize one record from its wire image. The bookkeeping fields
    /// come back zeroed — a replicated record is never `NEW`.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Marshal a batch of records into count-prefixed wire form.
pub fn marshal_batch(plots: &[DronePlot]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(COUNT_PREFIX_SIZE + plots.len() * RECORD_SIZE);
    buf.extend_from_slice(&(plots.len() as u32).to_le_bytes());
    for plot in plots {
        buf.extend_from_slice(&plot.to_wire()?);
    }
    Ok(buf)
}

/// Unmarshal a count-prefixed batch, validating the size arithmetic.
///
/// Fails when the buffer is shorter than the count prefix, when the
/// payload is not a whole number of [`RECORD_SIZE`] images, or when the
/// prefix disagrees with the number of images actually present.
pub fn unmarshal_batch(bytes: &[u8]) -> Result<Vec<DronePlot>> {
    if bytes.len() < COUNT_PREFIX_SIZE || (bytes.len() - COUNT_PREFIX_SIZE) % RECORD_SIZE != 0 {
        return Err(DbError::BadBatchLength {
            len: bytes.len(),
            record_size: RECORD_SIZE,
        });
    }

    let mut prefix = [0u8; COUNT_PREFIX_SIZE];
    prefix.copy_from_slice(&bytes[..COUNT_PREFIX_SIZE]);
    let count = u32::from_le_bytes(prefix);

    let payload = &bytes[COUNT_PREFIX_SIZE..];
    if payload.len() != count as usize * RECORD_SIZE {
        return Err(DbError::CountMismatch {
            count,
            payload: payload.len(),
        });
    }

    payload
        .chunks_exact(RECORD_SIZE)
        .map(DronePlot::from_wire)
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plot() -> DronePlot {
        DronePlot::new(42, 1, 1005, 10.0, 20.0, FLAG_NEW)
    }

    #[test]
    fn test_record_size_matches_wire_image() {
        let bytes = sample_plot().to_wire().unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);
    }

    #[test]
    fn test_wire_roundtrip_drops_flags() {
        let plot = sample_plot();
        let decoded = DronePlot::from_wire(&plot.to_wire().unwrap()).unwrap();
        assert_eq!(decoded.drone_id, plot.drone_id);
        assert_eq!(decoded.node_id, plot.node_id);
        assert_eq!(decoded.timestamp, plot.timestamp);
        assert_eq!(decoded.latitude.to_bits(), plot.latitude.to_bits());
        assert_eq!(decoded.longitude.to_bits(), plot.longitude.to_bits());
        assert_eq!(decoded.flags, 0);
        assert!(!decoded.checked);
    }

    #[test]
    fn test_batch_roundtrip_is_identity() {
        let plots = vec![
            DronePlot::new(42, 1, 1005, 10.0, 20.0, 0),
            DronePlot::new(42, 2, 1003, 10.0, 20.0, 0),
            DronePlot::new(7, 3, 1007, -33.5, 151.25, 0),
        ];
        let bytes = marshal_batch(&plots).unwrap();
        assert_eq!(bytes.len(), COUNT_PREFIX_SIZE + 3 * RECORD_SIZE);
        let decoded = unmarshal_batch(&bytes).unwrap();
        assert_eq!(decoded, plots);

        // And back again.
        assert_eq!(marshal_batch(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_empty_batch() {
        let bytes = marshal_batch(&[]).unwrap();
        assert_eq!(bytes, 0u32.to_le_bytes());
        assert!(unmarshal_batch(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_batch_rejects_ragged_payload() {
        let mut bytes = marshal_batch(&[sample_plot()]).unwrap();
        bytes.pop();
        assert!(matches!(
            unmarshal_batch(&bytes),
            Err(DbError::BadBatchLength { .. })
        ));
    }

    #[test]
    fn test_batch_rejects_short_buffer() {
        assert!(matches!(
            unmarshal_batch(&[1, 0]),
            Err(DbError::BadBatchLength { .. })
        ));
    }

    #[test]
    fn test_batch_rejects_lying_count() {
        let mut bytes = marshal_batch(&[sample_plot()]).unwrap();
        bytes[0] = 2;
        assert!(matches!(
            unmarshal_batch(&bytes),
            Err(DbError::CountMismatch { count: 2, .. })
        ));
    }
}
