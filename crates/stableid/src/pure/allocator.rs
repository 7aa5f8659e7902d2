//! Reserve and commit as pure document transforms.

use std::collections::HashSet;

use chrono::DateTime;
use chrono::Utc;

use crate::document::CounterDocument;
use crate::document::PendingReservation;

/// Outcome of [`compute_reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveResult {
    /// The document to publish and the reservation record appended to it.
    Success {
        document: CounterDocument,
        reservation: PendingReservation,
    },
    /// Minting the remainder would move `nextValue` past `u32::MAX`.
    Overflow,
}

/// Take up to `count` IDs from the tail of the free list (LIFO).
///
/// The returned IDs are in the order they were popped, most recently freed
/// first. The free list keeps whatever was not taken.
pub fn drain_free_list(free_list: &mut Vec<u32>, count: u32) -> Vec<u32> {
    let take = (count as usize).min(free_list.len());
    let split_at = free_list.len() - take;
    let mut taken = free_list.split_off(split_at);
    taken.reverse();
    taken
}

/// Mint `count` fresh IDs starting at `next_value`.
///
/// Returns the ascending IDs and the advanced counter, or `None` if the
/// counter would pass `u32::MAX`.
pub fn mint_ids(next_value: u32, count: u32) -> Option<(Vec<u32>, u32)> {
    let new_next_value = next_value.checked_add(count)?;
    Some(((next_value..new_next_value).collect(), new_next_value))
}

/// Allocate `reserve_count` IDs and record them as a pending reservation.
///
/// An absent document starts as `nextValue = 0` with empty lists. Free-list
/// entries are reused first (LIFO), then fresh IDs are minted from
/// `nextValue`. On overflow nothing is changed.
pub fn compute_reserve(
    current: Option<CounterDocument>,
    reservation_id: &str,
    reserve_count: u32,
    now: DateTime<Utc>,
) -> ReserveResult {
    let mut document = current.unwrap_or_default();

    let remaining = reserve_count.saturating_sub(document.free_list.len().min(u32::MAX as usize) as u32);
    let Some((minted, new_next_value)) = mint_ids(document.next_value, remaining) else {
        return ReserveResult::Overflow;
    };

    let mut reserved_ids = drain_free_list(&mut document.free_list, reserve_count);
    debug_assert_eq!(reserved_ids.len() + minted.len(), reserve_count as usize);
    reserved_ids.extend(minted);

    debug_assert!(new_next_value >= document.next_value, "nextValue must never decrease");
    document.next_value = new_next_value;

    let reservation = PendingReservation {
        reservation_id: reservation_id.to_string(),
        reservation_date: now,
        reserved_ids,
    };
    document.pending_reservations.push(reservation.clone());

    ReserveResult::Success { document, reservation }
}

/// Remove every pending reservation whose ID is listed, keeping the order of
/// the rest. IDs with no matching record are ignored.
pub fn remove_reservations(pending: &mut Vec<PendingReservation>, reservation_ids: &[String]) {
    if reservation_ids.is_empty() {
        return;
    }
    let targets: HashSet<&str> = reservation_ids.iter().map(String::as_str).collect();
    pending.retain(|r| !targets.contains(r.reservation_id.as_str()));
}

/// Return `unused_ids` to the free list and close the named reservations.
///
/// Unused IDs are appended in the given order, so the last one listed is
/// the first reused. They are not checked against the reservations being
/// closed. Committing an already-closed reservation changes nothing beyond
/// the free-list append, so replaying a commit with no unused IDs is a no-op.
pub fn compute_commit(
    current: Option<CounterDocument>,
    reservation_ids: &[String],
    unused_ids: &[u32],
) -> CounterDocument {
    let mut document = current.unwrap_or_default();
    document.free_list.extend_from_slice(unused_ids);
    remove_reservations(&mut document.pending_reservations, reservation_ids);
    document
}
