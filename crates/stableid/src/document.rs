//! Counter document stored once per allocation namespace.
//!
//! Serialized as JSON. The field names (`nextValue`, `freeList`,
//! `pendingReservations`, `reservationId`, `reservationDate`, `reservedIds`)
//! are part of the stored format and must not change.

use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

/// Allocator state for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDocument {
    /// Next never-issued ID, used once the free list is empty.
    #[serde(default)]
    pub next_value: u32,
    /// Returned IDs available for reuse. The tail is reused first.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub free_list: Vec<u32>,
    /// Reservations handed out and not yet committed.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pending_reservations: Vec<PendingReservation>,
}

/// A batch of IDs allocated by one reserve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReservation {
    /// Caller-supplied identifier, unique per outstanding reservation.
    pub reservation_id: String,
    /// When the reservation was made. Informational only; nothing expires.
    pub reservation_date: DateTime<Utc>,
    /// Allocated IDs: reused free-list entries first, then freshly minted ones.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reserved_ids: Vec<u32>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl CounterDocument {
    /// Find a pending reservation by ID.
    pub fn find_reservation(&self, reservation_id: &str) -> Option<&PendingReservation> {
        self.pending_reservations.iter().find(|r| r.reservation_id == reservation_id)
    }

    /// All IDs currently held by pending reservations, in document order.
    pub fn reserved_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.pending_reservations.iter().flat_map(|r| r.reserved_ids.iter().copied())
    }

    /// IDs that appear more than once across the free list and all pending
    /// reservations. Empty for a consistent document.
    pub fn duplicate_ids(&self) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for id in self.free_list.iter().copied().chain(self.reserved_ids()) {
            if !seen.insert(id) && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }
        duplicates
    }

    /// IDs in the free list or a pending reservation that were never minted.
    pub fn ids_beyond_counter(&self) -> Vec<u32> {
        self.free_list
            .iter()
            .copied()
            .chain(self.reserved_ids())
            .filter(|id| *id >= self.next_value)
            .collect()
    }

    /// Whether the document satisfies the allocator invariants.
    pub fn is_consistent(&self) -> bool {
        self.duplicate_ids().is_empty() && self.ids_beyond_counter().is_empty()
    }
}
