//! Performs the upload of a single [`Task`].
//!
//! Small objects are written with a single put. Objects at or above the multipart threshold go
//! through [`MultipartUpload`], which walks the store protocol in three phases:
//!
//! 1. open a session,
//! 2. upload every planned part with 1-based part numbers,
//! 3. complete the session with the ordered list of part tags.
//!
//! A failure in any phase abandons the task. Nothing is retried.

use std::fmt;

use thiserror::Error;

use crate::payload::Payload;
use crate::plan::{PartCapPolicy, PlanError, UploadPlan};
use crate::store::{CompletedPart, MultipartSession, SharedStore, Store, StoreError};
use crate::task::{Attributes, Task};

/// The default size of a multipart part, 5 MiB.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Progress of a multipart upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// Nothing has been sent yet.
    Idle,
    /// The store has assigned an upload id.
    SessionOpen,
    /// Parts are being transferred.
    PartsUploading,
    /// All parts were accepted and completion was requested.
    Completing,
    /// The object has been assembled.
    Done,
    /// The upload was abandoned.
    Failed,
}

impl UploadState {
    /// Returns `true` for [`Done`](Self::Done) and [`Failed`](Self::Failed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SessionOpen => "session open",
            Self::PartsUploading => "uploading parts",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors that abandon a single upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The object could not be planned as a multipart upload.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    /// The single-shot put failed.
    #[error("put failed: {0}")]
    Put(#[source] StoreError),

    /// The store refused to open a multipart session.
    #[error("opening multipart upload failed: {0}")]
    Open(#[source] StoreError),

    /// A part upload failed. Completion was not attempted.
    #[error("uploading part {part_number} failed: {source}")]
    Part {
        /// The part that failed.
        part_number: u32,
        /// The store error.
        #[source]
        source: StoreError,
    },

    /// The store rejected the completion request.
    #[error("completing multipart upload failed: {0}")]
    Complete(#[source] StoreError),

    /// The plan has no parts, so there is nothing to assemble.
    #[error("multipart plan is empty")]
    EmptyPlan,

    /// The upload was already executed.
    #[error("multipart upload already {0}")]
    AlreadyFinished(UploadState),

    /// The collected part tags do not match the plan.
    #[error("collected parts do not match the plan: expected {expected}, got {actual}")]
    PartMismatch {
        /// Number of parts in the plan.
        expected: usize,
        /// Number of parts collected.
        actual: usize,
    },
}

impl UploadError {
    /// The protocol state in which the upload failed.
    pub fn failed_in(&self) -> UploadState {
        match self {
            Self::Plan(_)
            | Self::Put(_)
            | Self::Open(_)
            | Self::EmptyPlan
            | Self::AlreadyFinished(_) => UploadState::Idle,
            Self::Part { .. } | Self::PartMismatch { .. } => UploadState::PartsUploading,
            Self::Complete(_) => UploadState::Completing,
        }
    }
}

/// How an upload was carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    /// A single put of the whole object.
    Single {
        /// Bytes written.
        size: u64,
    },
    /// A completed multipart upload.
    Multipart {
        /// Bytes written, which is less than the task size if the plan was truncated.
        size: u64,
        /// Number of parts.
        parts: usize,
    },
}

impl UploadKind {
    /// The number of bytes the store accepted.
    pub fn bytes_written(&self) -> u64 {
        match *self {
            Self::Single { size } | Self::Multipart { size, .. } => size,
        }
    }
}

/// Drives one multipart upload through its states.
///
/// The state only moves forward. Once [`Failed`](UploadState::Failed) or
/// [`Done`](UploadState::Done) is reached, the upload cannot be executed again.
#[derive(Debug)]
pub struct MultipartUpload<'a> {
    plan: &'a UploadPlan,
    state: UploadState,
    session: Option<MultipartSession>,
    completed: Vec<CompletedPart>,
}

impl<'a> MultipartUpload<'a> {
    /// Prepares an upload for the given plan.
    pub fn new(plan: &'a UploadPlan) -> Self {
        Self {
            plan,
            state: UploadState::Idle,
            session: None,
            completed: Vec::with_capacity(plan.parts().len()),
        }
    }

    /// The current state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The session, once one has been opened.
    pub fn session(&self) -> Option<&MultipartSession> {
        self.session.as_ref()
    }

    /// Parts accepted by the store so far.
    pub fn completed_parts(&self) -> &[CompletedPart] {
        &self.completed
    }

    fn transition(&mut self, next: UploadState) {
        debug_assert!(!self.state.is_terminal(), "upload already finished");
        tracing::trace!(from = %self.state, to = %next, "multipart upload state change");
        self.state = next;
    }

    fn fail(&mut self, error: UploadError) -> UploadError {
        self.transition(UploadState::Failed);
        error
    }

    /// Runs all three phases against the store.
    ///
    /// On error the upload is left in [`UploadState::Failed`]; an opened session is abandoned and
    /// left to the store to clean up.
    pub async fn execute(
        &mut self,
        store: &dyn Store,
        container: &str,
        key: &str,
        attributes: &Attributes,
    ) -> Result<UploadKind, UploadError> {
        if self.state != UploadState::Idle {
            return Err(UploadError::AlreadyFinished(self.state));
        }

        let plan = self.plan;
        if plan.is_empty() {
            return Err(self.fail(UploadError::EmptyPlan));
        }

        let session = match store.open_multipart(container, key).await {
            Ok(session) => session,
            Err(err) => return Err(self.fail(UploadError::Open(err))),
        };
        tracing::debug!(upload_id = %session.upload_id, "opened multipart upload");
        self.session = Some(session.clone());
        self.transition(UploadState::SessionOpen);

        self.transition(UploadState::PartsUploading);
        for part in plan.parts() {
            let body = Payload::new(part.len);
            match store
                .upload_part(&session, part.number, body, attributes)
                .await
            {
                Ok(tag) => self.completed.push(CompletedPart {
                    number: part.number,
                    tag,
                }),
                Err(source) => {
                    return Err(self.fail(UploadError::Part {
                        part_number: part.number,
                        source,
                    }));
                }
            }
        }

        let issued = plan.parts().iter().map(|part| part.number);
        let collected = self.completed.iter().map(|part| part.number);
        if !issued.eq(collected) {
            let error = UploadError::PartMismatch {
                expected: plan.parts().len(),
                actual: self.completed.len(),
            };
            return Err(self.fail(error));
        }

        self.transition(UploadState::Completing);
        if let Err(err) = store.complete_multipart(&session, &self.completed).await {
            return Err(self.fail(UploadError::Complete(err)));
        }

        self.transition(UploadState::Done);
        Ok(UploadKind::Multipart {
            size: plan.total_size(),
            parts: self.completed.len(),
        })
    }
}

/// Settings that decide how objects are uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSettings {
    /// Objects of at least this size use multipart uploads. `None` disables multipart.
    pub multipart_threshold: Option<u64>,
    /// Size of each multipart part.
    pub part_size: u64,
    /// Maximum number of parts per upload.
    pub max_parts: Option<usize>,
    /// What to do with uploads that exceed `max_parts`.
    pub part_cap_policy: PartCapPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            multipart_threshold: None,
            part_size: DEFAULT_PART_SIZE,
            max_parts: None,
            part_cap_policy: PartCapPolicy::default(),
        }
    }
}

/// Uploads tasks to a store, choosing between single-shot and multipart uploads.
#[derive(Clone, Debug)]
pub struct Uploader {
    store: SharedStore,
    settings: UploadSettings,
}

impl Uploader {
    /// Creates an uploader writing to `store`.
    pub fn new(store: SharedStore, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    /// Returns `true` if the task should go through a multipart upload.
    pub fn uses_multipart(&self, task: &Task) -> bool {
        match self.settings.multipart_threshold {
            Some(threshold) => task.size > 0 && task.size >= threshold,
            None => false,
        }
    }

    /// Plans the multipart upload of a task, applying the part cap.
    pub fn plan(&self, task: &Task) -> Result<UploadPlan, PlanError> {
        let UploadSettings {
            part_size,
            max_parts,
            part_cap_policy,
            ..
        } = self.settings;
        match max_parts {
            Some(max_parts) => {
                UploadPlan::with_max_parts(task.size, part_size, max_parts, part_cap_policy)
            }
            None => UploadPlan::new(task.size, part_size),
        }
    }

    /// Uploads one task.
    pub async fn upload(&self, task: &Task) -> Result<UploadKind, UploadError> {
        let attributes = task.attributes();

        if !self.uses_multipart(task) {
            self.store
                .put_object(&task.container, &task.key, Payload::new(task.size), &attributes)
                .await
                .map_err(UploadError::Put)?;
            return Ok(UploadKind::Single { size: task.size });
        }

        let plan = self.plan(task)?;
        if plan.total_size() < task.size {
            tracing::warn!(
                key = %task.key,
                planned = plan.total_size(),
                requested = task.size,
                "truncating multipart upload to the part limit"
            );
        }

        MultipartUpload::new(&plan)
            .execute(self.store.as_ref(), &task.container, &task.key, &attributes)
            .await
    }
}
