//! Time-ordered business numbers for orders, payments and recharges

use std::sync::{Mutex, PoisonError};

/// Snowflake-style generator.
///
/// Layout: timestamp ms (41 bits) | machine_id (8 bits) | sequence (15 bits),
/// rendered in decimal behind a prefix such as `DS`.
pub struct OrderNoGenerator {
    machine_id: u8,
    state: Mutex<(u64, u32)>,
}

impl OrderNoGenerator {
    pub fn new(machine_id: u8) -> Self {
        Self {
            machine_id,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (last, seq) = *state;

        let (ts, seq) = if now <= last {
            // Same or earlier millisecond: keep counting on the last one,
            // borrowing the next millisecond when the sequence wraps.
            if seq >= 0x7FFF {
                (last + 1, 0)
            } else {
                (last, seq + 1)
            }
        } else {
            (now, 0)
        };
        *state = (ts, seq);

        (ts << 23) | ((self.machine_id as u64) << 15) | (seq as u64 & 0x7FFF)
    }

    pub fn next(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id())
    }
}

impl Default for OrderNoGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
