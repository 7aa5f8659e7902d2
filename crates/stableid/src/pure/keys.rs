//! Document key layout.

/// Prefix shared by every key the allocator writes.
pub const STABLEID_PREFIX: &str = "__stableid:";

/// Key of the counter document for a collection's stable ID group.
///
/// ```ignore
/// assert_eq!(marker_key("boundsource", 23), "__stableid:marker:boundsource#23");
/// ```
#[inline]
pub fn marker_key(collection: &str, group: u8) -> String {
    format!("{STABLEID_PREFIX}marker:{collection}#{group}")
}

/// Key of the registration record binding an entity UID to its stable ID.
#[inline]
pub fn entity_key(collection: &str, uid: &str) -> String {
    format!("{STABLEID_PREFIX}entity:{collection}:{uid}")
}
