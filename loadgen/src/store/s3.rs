use std::fmt;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpRequest;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_smithy_types::body::SdkBody;
use futures::TryStreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio_util::io::ReaderStream;

use super::{CompletedPart, MultipartSession, Store, StoreError, StoreResult};
use crate::payload::Payload;
use crate::task::Attributes;

/// Name of the credentials provider, visible in SDK diagnostics.
const PROVIDER_NAME: &str = "loadgen-static";

/// Size of the chunks a request body is streamed in.
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Connection settings for an [`S3Store`].
#[derive(Clone, Debug, Default)]
pub struct S3StoreConfig {
    /// Service endpoint. Endpoints without a scheme are reached over plain HTTP.
    pub endpoint: String,
    /// Signing region.
    pub region: String,
    /// Static access key id.
    pub access_key_id: String,
    /// Static secret access key.
    pub secret_access_key: String,
    /// Optional session token.
    pub session_token: Option<String>,
}

/// A [`Store`] backed by an S3-compatible service.
///
/// Requests use path-style addressing, and object attributes are sent verbatim as request
/// headers, since services that honor retention hints read them from custom `x-amz-` headers.
pub struct S3Store {
    client: Client,
    endpoint: String,
}

impl S3Store {
    /// Creates a client for the configured endpoint.
    pub fn new(config: S3StoreConfig) -> Self {
        let endpoint = normalize_endpoint(&config.endpoint);
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            config.session_token,
            None,
            PROVIDER_NAME,
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            endpoint,
        }
    }
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}

/// Returns a request mutator that adds the attributes as headers.
fn attribute_headers(
    attributes: &Attributes,
) -> impl Fn(&mut HttpRequest) + Send + Sync + 'static {
    let attributes = attributes.clone();
    move |request| {
        for (name, value) in &attributes {
            if let Err(err) = request
                .headers_mut()
                .try_insert(name.clone(), value.clone())
            {
                tracing::warn!(header = %name, error = %err, "skipping invalid attribute header");
            }
        }
    }
}

fn request_error<E>(context: &str, err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::debug!(error = %DisplayErrorContext(&err), "{context} failed");
    StoreError::Request {
        context: context.to_owned(),
        cause: Box::new(err),
    }
}

/// Streams the payload as a request body without buffering it.
///
/// The body is retryable: every attempt starts a fresh payload of the same length, which yields
/// identical bytes.
fn into_body(payload: &Payload) -> StoreResult<(ByteStream, i64)> {
    let len = payload.remaining();
    let content_length =
        i64::try_from(len).map_err(|err| request_error("convert content length", err))?;

    let body = SdkBody::retryable(move || {
        let frames =
            ReaderStream::with_capacity(Payload::new(len), BODY_CHUNK_SIZE).map_ok(Frame::data);
        SdkBody::from_body_1_x(StreamBody::new(frames))
    });
    Ok((ByteStream::new(body), content_length))
}

#[async_trait]
impl Store for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(level = "trace", skip_all, fields(container = %container, key = %key))]
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<()> {
        let (body, content_length) = into_body(&body)?;
        let output = self
            .client
            .put_object()
            .bucket(container)
            .key(key)
            .content_length(content_length)
            .body(body)
            .customize()
            .mutate_request(attribute_headers(attributes))
            .send()
            .await
            .map_err(|err| request_error("put object", err))?;

        tracing::debug!(e_tag = output.e_tag(), "object written");
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(container = %container, key = %key))]
    async fn open_multipart(&self, container: &str, key: &str) -> StoreResult<MultipartSession> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|err| request_error("create multipart upload", err))?;

        let upload_id = output
            .upload_id()
            .ok_or(StoreError::MalformedResponse("missing upload id"))?;

        Ok(MultipartSession {
            container: container.to_owned(),
            key: key.to_owned(),
            upload_id: upload_id.to_owned(),
        })
    }

    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(upload_id = %session.upload_id, part_number = part_number)
    )]
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<String> {
        let part_number = i32::try_from(part_number)
            .map_err(|err| request_error("convert part number", err))?;
        let (body, content_length) = into_body(&body)?;

        let output = self
            .client
            .upload_part()
            .bucket(&session.container)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .content_length(content_length)
            .body(body)
            .customize()
            .mutate_request(attribute_headers(attributes))
            .send()
            .await
            .map_err(|err| request_error("upload part", err))?;

        let tag = output
            .e_tag()
            .ok_or(StoreError::MalformedResponse("missing part ETag"))?;
        Ok(tag.to_owned())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(upload_id = %session.upload_id))]
    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> StoreResult<()> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            let number = i32::try_from(part.number)
                .map_err(|err| request_error("convert part number", err))?;
            completed.push(
                S3CompletedPart::builder()
                    .part_number(number)
                    .e_tag(&part.tag)
                    .build(),
            );
        }

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&session.container)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|err| request_error("complete multipart upload", err))?;

        Ok(())
    }
}
