//! Typed parameters for reserve and commit.
//!
//! [`ReserveParams`] and [`CommitParams`] are the loosely typed wire forms
//! (camelCase names, signed integers) as a host passes them; converting them
//! into [`ReserveRequest`] / [`CommitRequest`] performs the argument checks.

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::constants::MAX_RESERVATION_ID_LEN;
use crate::constants::MAX_RESERVE_COUNT;
use crate::error::StableIdError;

/// Parameters for reserving a batch of IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    /// Caller-unique identifier for this batch.
    pub reservation_id: String,
    /// Number of IDs to allocate. Zero yields an empty reservation record.
    pub reserve_count: u32,
}

impl ReserveRequest {
    pub fn new(reservation_id: impl Into<String>, reserve_count: u32) -> Self {
        Self {
            reservation_id: reservation_id.into(),
            reserve_count,
        }
    }

    /// Reserve under a freshly generated UUID v4 reservation ID.
    pub fn with_generated_id(reserve_count: u32) -> Self {
        Self::new(Uuid::new_v4().to_string(), reserve_count)
    }

    /// Check the arguments without touching storage.
    pub fn validate(&self) -> Result<(), StableIdError> {
        validate_reservation_id(&self.reservation_id)?;
        if self.reserve_count > MAX_RESERVE_COUNT {
            return Err(StableIdError::invalid(format!(
                "reserve count {} exceeds maximum of {}",
                self.reserve_count, MAX_RESERVE_COUNT
            )));
        }
        Ok(())
    }
}

/// Parameters for committing one or more reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Reservations being finalized.
    pub reservation_ids: Vec<String>,
    /// IDs from those reservations that went unused and return to the free list.
    pub unused_ids: Vec<u32>,
}

impl CommitRequest {
    pub fn new(reservation_ids: Vec<String>, unused_ids: Vec<u32>) -> Self {
        Self {
            reservation_ids,
            unused_ids,
        }
    }

    /// Commit a single reservation.
    pub fn single(reservation_id: impl Into<String>, unused_ids: Vec<u32>) -> Self {
        Self::new(vec![reservation_id.into()], unused_ids)
    }

    /// Check the arguments without touching storage.
    ///
    /// Unused IDs are not checked against the reservations they claim to
    /// come from; the caller is trusted on that.
    pub fn validate(&self) -> Result<(), StableIdError> {
        for reservation_id in &self.reservation_ids {
            validate_reservation_id(reservation_id)?;
        }
        Ok(())
    }
}

fn validate_reservation_id(reservation_id: &str) -> Result<(), StableIdError> {
    if reservation_id.is_empty() {
        return Err(StableIdError::invalid("reservation id must not be empty"));
    }
    if reservation_id.len() > MAX_RESERVATION_ID_LEN {
        return Err(StableIdError::invalid(format!(
            "reservation id length {} exceeds maximum of {}",
            reservation_id.len(),
            MAX_RESERVATION_ID_LEN
        )));
    }
    Ok(())
}

/// Reserve parameters as received from an untyped source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveParams {
    pub reservation_id: String,
    pub reserve_count: i64,
}

impl TryFrom<ReserveParams> for ReserveRequest {
    type Error = StableIdError;

    fn try_from(params: ReserveParams) -> Result<Self, Self::Error> {
        let reserve_count = u32::try_from(params.reserve_count).map_err(|_| {
            StableIdError::invalid(format!("reserve count {} must be a non-negative integer", params.reserve_count))
        })?;
        let request = ReserveRequest::new(params.reservation_id, reserve_count);
        request.validate()?;
        Ok(request)
    }
}

/// Commit parameters as received from an untyped source.
///
/// Accepts `returnedIds` as an alias of `unusedIds`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitParams {
    #[serde(default)]
    pub reservation_ids: Vec<String>,
    #[serde(default, alias = "returnedIds")]
    pub unused_ids: Vec<i64>,
}

impl TryFrom<CommitParams> for CommitRequest {
    type Error = StableIdError;

    fn try_from(params: CommitParams) -> Result<Self, Self::Error> {
        let unused_ids = params
            .unused_ids
            .iter()
            .map(|id| u32::try_from(*id).map_err(|_| StableIdError::invalid(format!("unused id {id} is out of range"))))
            .collect::<Result<Vec<_>, _>>()?;
        let request = CommitRequest::new(params.reservation_ids, unused_ids);
        request.validate()?;
        Ok(request)
    }
}
