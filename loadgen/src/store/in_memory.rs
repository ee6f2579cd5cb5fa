//! In-memory store for dry runs and tests.
//!
//! This provides a [`Store`] that only records object sizes and attributes, so a run can be
//! exercised end to end without a storage service. The store is [`Clone`], which lets tests keep
//! a handle for inspection while the workers own another. Failures can be injected per object key
//! and protocol step.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CompletedPart, MultipartSession, Store, StoreError, StoreResult};
use crate::payload::Payload;
use crate::task::Attributes;

/// An object as recorded by the [`InMemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Number of bytes received for the object.
    pub size: u64,
    /// Attributes sent with the object, or with its first part for multipart uploads.
    pub attributes: Attributes,
    /// Number of parts, or `None` for single-shot uploads.
    pub parts: Option<usize>,
}

#[derive(Debug, Default)]
struct OpenUpload {
    container: String,
    key: String,
    attributes: Attributes,
    parts: BTreeMap<u32, (String, u64)>,
}

#[derive(Debug, Default)]
struct Failures {
    put: HashSet<String>,
    open: HashSet<String>,
    parts: HashSet<(String, u32)>,
    complete: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, OpenUpload>,
    next_upload_id: u64,
    complete_calls: usize,
    failures: Failures,
}

/// A [`Store`] keeping object metadata in a `HashMap`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every single-shot put of `key` fail.
    pub fn fail_put(&self, key: impl Into<String>) {
        self.state.lock().unwrap().failures.put.insert(key.into());
    }

    /// Makes opening a multipart upload for `key` fail.
    pub fn fail_open(&self, key: impl Into<String>) {
        self.state.lock().unwrap().failures.open.insert(key.into());
    }

    /// Makes uploading part `part_number` of `key` fail.
    pub fn fail_part(&self, key: impl Into<String>, part_number: u32) {
        let mut state = self.state.lock().unwrap();
        state.failures.parts.insert((key.into(), part_number));
    }

    /// Makes completing the multipart upload of `key` fail.
    pub fn fail_complete(&self, key: impl Into<String>) {
        self.state.lock().unwrap().failures.complete.insert(key.into());
    }

    /// Returns the recorded object, if it was written successfully.
    pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(container.to_owned(), key.to_owned()))
            .cloned()
    }

    /// The number of objects written successfully.
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// The number of multipart uploads that were opened but never completed.
    pub fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    /// The number of times completion was requested, successful or not.
    pub fn complete_calls(&self) -> usize {
        self.state.lock().unwrap().complete_calls
    }
}

async fn drain(mut body: Payload) -> StoreResult<u64> {
    Ok(tokio::io::copy(&mut body, &mut tokio::io::sink()).await?)
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        if self.state.lock().unwrap().failures.put.contains(key) {
            return Err(StoreError::Injected(format!("put of `{key}`")));
        }

        let size = drain(body).await?;
        let object = StoredObject {
            size,
            attributes: attributes.clone(),
            parts: None,
        };
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((container.to_owned(), key.to_owned()), object);
        Ok(())
    }

    async fn open_multipart(&self, container: &str, key: &str) -> StoreResult<MultipartSession> {
        let mut state = self.state.lock().unwrap();
        if state.failures.open.contains(key) {
            return Err(StoreError::Injected(format!("open of `{key}`")));
        }

        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                container: container.to_owned(),
                key: key.to_owned(),
                ..Default::default()
            },
        );

        Ok(MultipartSession {
            container: container.to_owned(),
            key: key.to_owned(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<String> {
        {
            let state = self.state.lock().unwrap();
            let failing = (session.key.clone(), part_number);
            if state.failures.parts.contains(&failing) {
                return Err(StoreError::Injected(format!(
                    "part {part_number} of `{}`",
                    session.key
                )));
            }
            if !state.uploads.contains_key(&session.upload_id) {
                return Err(StoreError::UnknownSession(session.upload_id.clone()));
            }
        }

        let size = drain(body).await?;
        let tag = format!("\"{}-{part_number}\"", session.upload_id);

        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(&session.upload_id)
            .ok_or_else(|| StoreError::UnknownSession(session.upload_id.clone()))?;
        if upload.attributes.is_empty() {
            upload.attributes = attributes.clone();
        }
        upload.parts.insert(part_number, (tag.clone(), size));

        Ok(tag)
    }

    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.complete_calls += 1;
        if state.failures.complete.contains(&session.key) {
            return Err(StoreError::Injected(format!(
                "completion of `{}`",
                session.key
            )));
        }

        let upload = state
            .uploads
            .get(&session.upload_id)
            .ok_or_else(|| StoreError::UnknownSession(session.upload_id.clone()))?;

        if parts.is_empty() {
            return Err(StoreError::InvalidParts("no parts given".into()));
        }
        if parts.len() != upload.parts.len() {
            return Err(StoreError::InvalidParts(format!(
                "got {} parts, {} were uploaded",
                parts.len(),
                upload.parts.len()
            )));
        }
        if !parts.windows(2).all(|pair| pair[0].number < pair[1].number) {
            return Err(StoreError::InvalidParts(
                "parts are not in ascending order".into(),
            ));
        }

        let mut size = 0;
        for part in parts {
            match upload.parts.get(&part.number) {
                Some((tag, part_size)) if *tag == part.tag => size += part_size,
                Some(_) => {
                    return Err(StoreError::InvalidParts(format!(
                        "tag mismatch for part {}",
                        part.number
                    )));
                }
                None => {
                    return Err(StoreError::InvalidParts(format!(
                        "part {} was never uploaded",
                        part.number
                    )));
                }
            }
        }

        if let Some(upload) = state.uploads.remove(&session.upload_id) {
            let object = StoredObject {
                size,
                attributes: upload.attributes,
                parts: Some(parts.len()),
            };
            state.objects.insert((upload.container, upload.key), object);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes() -> Attributes {
        [("x-test".to_owned(), "1".to_owned())].into()
    }

    #[tokio::test]
    async fn put_records_size() {
        let store = InMemoryStore::new();
        store
            .put_object("bucket", "key", Payload::new(123), &attributes())
            .await
            .unwrap();

        let object = store.object("bucket", "key").unwrap();
        assert_eq!(object.size, 123);
        assert_eq!(object.attributes, attributes());
        assert_eq!(object.parts, None);
    }

    #[tokio::test]
    async fn multipart_roundtrip() {
        let store = InMemoryStore::new();
        let session = store.open_multipart("bucket", "key").await.unwrap();

        let mut parts = Vec::new();
        for (number, len) in [(1, 10), (2, 4)] {
            let tag = store
                .upload_part(&session, number, Payload::new(len), &attributes())
                .await
                .unwrap();
            parts.push(CompletedPart { number, tag });
        }
        store.complete_multipart(&session, &parts).await.unwrap();

        let object = store.object("bucket", "key").unwrap();
        assert_eq!(object.size, 14);
        assert_eq!(object.parts, Some(2));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn completion_rejects_missing_parts() {
        let store = InMemoryStore::new();
        let session = store.open_multipart("bucket", "key").await.unwrap();
        let tag = store
            .upload_part(&session, 1, Payload::new(1), &attributes())
            .await
            .unwrap();
        store
            .upload_part(&session, 2, Payload::new(1), &attributes())
            .await
            .unwrap();

        let err = store
            .complete_multipart(&session, &[CompletedPart { number: 1, tag }])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidParts(_)));
        assert!(store.object("bucket", "key").is_none());
    }

    #[tokio::test]
    async fn completion_rejects_wrong_tag() {
        let store = InMemoryStore::new();
        let session = store.open_multipart("bucket", "key").await.unwrap();
        store
            .upload_part(&session, 1, Payload::new(1), &attributes())
            .await
            .unwrap();

        let bogus = CompletedPart {
            number: 1,
            tag: "\"nope\"".into(),
        };
        let err = store
            .complete_multipart(&session, &[bogus])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidParts(_)));
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = InMemoryStore::new();
        store.fail_put("a");
        store.fail_open("b");
        store.fail_part("c", 2);

        assert!(
            store
                .put_object("bucket", "a", Payload::new(1), &attributes())
                .await
                .is_err()
        );
        assert!(store.open_multipart("bucket", "b").await.is_err());

        let session = store.open_multipart("bucket", "c").await.unwrap();
        assert!(
            store
                .upload_part(&session, 1, Payload::new(1), &attributes())
                .await
                .is_ok()
        );
        assert!(
            store
                .upload_part(&session, 2, Payload::new(1), &attributes())
                .await
                .is_err()
        );
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.open_uploads(), 1);
    }
}
