//! The 64-bit Snowflake layout.
//!
//! ```text
//!  Bit Index:  63           63 62            22 21             12 11             0
//!              +--------------+----------------+-----------------+---------------+
//!  Field:      | reserved (1) | timestamp (41) | worker ID (10)  | sequence (12) |
//!              +--------------+----------------+-----------------+---------------+
//!              |<----------- MSB ---------- 64 bits ----------- LSB ------------>|
//! ```
//!
//! The timestamp is milliseconds since the generator's epoch. The reserved
//! sign bit keeps every id a non-negative `i64`.

use serde::Serialize;

pub const TIMESTAMP_BITS: u32 = 41;
pub const WORKER_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

/// Bitmask for extracting the 41-bit timestamp field.
pub const TIMESTAMP_MASK: i64 = (1 << TIMESTAMP_BITS) - 1;

/// Largest worker id the layout can carry (1023).
pub const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;

/// Bitmask for extracting the 12-bit sequence field (4095).
pub const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

pub const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
pub const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;

/// Packs the three fields into an id. Out-of-range inputs are masked.
///
/// # Example
///
/// ```
/// use leafid::snowflake::compose;
///
/// assert_eq!(compose(1, 1, 1), (1 << 22) | (1 << 12) | 1);
/// ```
pub const fn compose(elapsed_ms: i64, worker_id: i64, sequence: i64) -> i64 {
    ((elapsed_ms & TIMESTAMP_MASK) << TIMESTAMP_SHIFT)
        | ((worker_id & MAX_WORKER_ID) << WORKER_ID_SHIFT)
        | (sequence & SEQUENCE_MASK)
}

/// The fields of an id, with the timestamp shifted back to Unix
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DecodedSnowflake {
    pub timestamp_ms: i64,
    pub worker_id: i64,
    pub sequence: i64,
}

/// Splits `id` into its fields, adding `epoch_ms` back to the timestamp.
pub const fn decode(id: i64, epoch_ms: i64) -> DecodedSnowflake {
    DecodedSnowflake {
        timestamp_ms: ((id >> TIMESTAMP_SHIFT) & TIMESTAMP_MASK) + epoch_ms,
        worker_id: (id >> WORKER_ID_SHIFT) & MAX_WORKER_ID,
        sequence: id & SEQUENCE_MASK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TWITTER_EPOCH;

    #[test]
    fn decode_recovers_fields() {
        let epoch = TWITTER_EPOCH.as_millis() as i64;
        let now = epoch + 123_456_789;
        let id = compose(now - epoch, 513, 4_000);

        assert!(id > 0);
        assert_eq!(
            decode(id, epoch),
            DecodedSnowflake {
                timestamp_ms: now,
                worker_id: 513,
                sequence: 4_000,
            }
        );
    }

    #[test]
    fn fields_do_not_bleed_into_each_other() {
        let id = compose(0, MAX_WORKER_ID + 1, SEQUENCE_MASK + 1);
        assert_eq!(id, 0);

        let id = compose(TIMESTAMP_MASK, MAX_WORKER_ID, SEQUENCE_MASK);
        assert_eq!(id, i64::MAX);
    }
}
