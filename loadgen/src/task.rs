//! The unit of work handed to the worker pool.

use std::collections::BTreeMap;
use std::fmt;

use bytesize::ByteSize;

/// Header carrying the number of days after which the store may expire an object.
pub const DELETE_AFTER_DAYS_HEADER: &str = "x-amz-extend-delete-after-days";

/// Opaque per-object attributes forwarded to the store, usually as request headers.
pub type Attributes = BTreeMap<String, String>;

/// A single object to upload.
///
/// Tasks are created by the [`Sampler`](crate::sampler::Sampler) and consumed exactly once by a
/// worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// The container (bucket) to write to.
    pub container: String,
    /// The object key, unique within a run.
    pub key: String,
    /// The target size of the object in bytes.
    pub size: u64,
    /// Retention in days, kept as the string sent to the store.
    pub delete_after_days: String,
}

impl Task {
    /// Builds the object key for the task with the given index within a run.
    ///
    /// Keys have the form `{run_timestamp}-{index}`, so they stay unique as long as indices do.
    pub fn key_for(run_timestamp: u64, index: usize) -> String {
        format!("{run_timestamp}-{index}")
    }

    /// Returns the attributes the store should attach to this object.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            DELETE_AFTER_DAYS_HEADER.to_owned(),
            self.delete_after_days.clone(),
        );
        attributes
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.container,
            self.key,
            ByteSize::b(self.size)
        )
    }
}
