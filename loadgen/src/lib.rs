//! A synthetic load generator for S3-compatible object stores.
//!
//! A run uploads a fixed number of objects through a bounded pool of workers. Each object gets a
//! size and a retention hint drawn from configured candidates, and its content is produced on the
//! fly by a [`Payload`], so arbitrarily large objects never need backing storage.
//!
//! Objects at or above the multipart threshold are split by an [`UploadPlan`] and written with the
//! three-step multipart protocol: open a session, upload every part, complete the session. Smaller
//! objects are written with a single put.
//!
//! Failures of individual uploads are logged and collected, but never stop a run. The collected
//! [`TaskOutcome`]s are summarized in a [`RunReport`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod observability;
pub mod payload;
pub mod plan;
pub mod pool;
pub mod report;
pub mod sampler;
pub mod store;
pub mod task;
pub mod upload;

pub use crate::payload::Payload;
pub use crate::plan::UploadPlan;
pub use crate::pool::{TaskOutcome, run};
pub use crate::report::RunReport;
pub use crate::sampler::Sampler;
pub use crate::task::Task;
