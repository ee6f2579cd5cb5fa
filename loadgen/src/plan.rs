//! Splits an object into the parts of a multipart upload.
//!
//! An [`UploadPlan`] covers `[0, total_size)` with contiguous, non-overlapping [`PartRange`]s of
//! `part_size` bytes each, except for a shorter final part. Part numbers start at 1, as the store
//! protocol expects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while planning a multipart upload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The part size was zero, which would never cover a non-empty object.
    #[error("part size must be greater than zero")]
    ZeroPartSize,

    /// The plan needs more parts than allowed and the cap policy forbids truncation.
    #[error("upload needs {parts} parts, exceeding the limit of {max_parts}")]
    TooManyParts {
        /// Number of parts the full object requires.
        parts: u64,
        /// The configured maximum.
        max_parts: usize,
    },

    /// The plan needs more parts than can be numbered.
    #[error("upload needs {parts} parts, more than part numbers allow")]
    PartNumberOverflow {
        /// Number of parts the object requires.
        parts: u64,
    },
}

/// What to do when a plan needs more parts than the configured maximum.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartCapPolicy {
    /// Upload only the first `max_parts` parts, producing a smaller object.
    #[default]
    Truncate,
    /// Fail the upload without contacting the store.
    Fail,
}

/// A contiguous byte range of the object, uploaded as one part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub number: u32,
    /// Offset of the first byte of this part within the object.
    pub offset: u64,
    /// Length of this part in bytes.
    pub len: u64,
}

impl PartRange {
    /// The offset one past the last byte of this part.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// The ordered parts of a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPlan {
    total_size: u64,
    part_size: u64,
    parts: Vec<PartRange>,
}

impl UploadPlan {
    /// Plans the upload of `total_size` bytes in parts of `part_size` bytes.
    ///
    /// The plan contains `ceil(total_size / part_size)` parts. A zero-sized object yields an empty
    /// plan.
    pub fn new(total_size: u64, part_size: u64) -> Result<Self, PlanError> {
        let count = part_count(total_size, part_size)?;
        Self::build(total_size, part_size, count)
    }

    /// Plans the upload like [`new`](Self::new), with at most `max_parts` parts.
    ///
    /// Plans within the limit are unaffected. Otherwise, [`PartCapPolicy::Truncate`] keeps the
    /// first `max_parts` parts and shrinks the total size accordingly, while
    /// [`PartCapPolicy::Fail`] returns [`PlanError::TooManyParts`]. The limit is applied before
    /// any part is laid out.
    pub fn with_max_parts(
        total_size: u64,
        part_size: u64,
        max_parts: usize,
        policy: PartCapPolicy,
    ) -> Result<Self, PlanError> {
        let count = part_count(total_size, part_size)?;
        let limit = u64::try_from(max_parts).unwrap_or(u64::MAX);
        if count <= limit {
            return Self::build(total_size, part_size, count);
        }

        match policy {
            PartCapPolicy::Fail => Err(PlanError::TooManyParts {
                parts: count,
                max_parts,
            }),
            // `limit < count`, so the truncated size is below `total_size`.
            PartCapPolicy::Truncate => Self::build(limit * part_size, part_size, limit),
        }
    }

    fn build(total_size: u64, part_size: u64, count: u64) -> Result<Self, PlanError> {
        let last =
            u32::try_from(count).map_err(|_| PlanError::PartNumberOverflow { parts: count })?;
        let parts = (1..=last)
            .map(|number| {
                let offset = u64::from(number - 1) * part_size;
                PartRange {
                    number,
                    offset,
                    len: part_size.min(total_size - offset),
                }
            })
            .collect();

        Ok(Self {
            total_size,
            part_size,
            parts,
        })
    }

    /// The number of bytes covered by the plan.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The nominal size of each part.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// The ordered parts.
    pub fn parts(&self) -> &[PartRange] {
        &self.parts
    }

    /// Returns `true` if there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn part_count(total_size: u64, part_size: u64) -> Result<u64, PlanError> {
    if part_size == 0 {
        return Err(PlanError::ZeroPartSize);
    }
    Ok(total_size.div_ceil(part_size))
}
