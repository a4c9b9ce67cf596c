//! Date normalization shared by every write path.
//!
//! Stores disagree on how they represent "unset" or pre-epoch timestamps, so
//! all dates on a [`LibraryFile`](crate::file::LibraryFile) are clamped to
//! [`epoch_floor`] before they are persisted or compared.

use chrono::{DateTime, Utc};

/// Earliest instant any stored date may hold.
pub fn epoch_floor() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Clamp `value` so it is never earlier than [`epoch_floor`].
pub fn normalize(value: DateTime<Utc>) -> DateTime<Utc> {
    value.max(epoch_floor())
}

/// True when `value` is the floor sentinel (or, impossibly, before it).
pub fn is_unset(value: DateTime<Utc>) -> bool {
    value <= epoch_floor()
}
