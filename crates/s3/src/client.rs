//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the StorageClient trait from objsync-core.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, MetadataDirective,
    ObjectCannedAcl, ServerSideEncryption, StorageClass,
};
use futures::StreamExt;
use jiff::Timestamp;
use objsync_core::body::collect_body;
use objsync_core::{
    ByteRange, ByteStream, CompletedPart, Error, ListOptions, ListResult, ObjectAttributes,
    ObjectInfo, RemotePath, Result, StorageClient,
};

use crate::error::map_sdk_error;

const DEFAULT_REGION: &str = "us-east-1";

/// Set every attribute on a put, copy or create-multipart request.
///
/// The three SDK builders share these setters but no trait.
macro_rules! with_attributes {
    ($request:expr, $attributes:expr) => {{
        let attributes: &ObjectAttributes = $attributes;
        let grants = &attributes.grants;
        $request
            .set_content_type(attributes.content_type.clone())
            .set_cache_control(attributes.cache_control.clone())
            .set_content_disposition(attributes.content_disposition.clone())
            .set_content_encoding(attributes.content_encoding.clone())
            .set_content_language(attributes.content_language.clone())
            .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
            .set_server_side_encryption(attributes.sse.as_deref().map(ServerSideEncryption::from))
            .set_ssekms_key_id(attributes.sse_kms_key_id.clone())
            .set_acl(attributes.acl.as_deref().map(ObjectCannedAcl::from))
            .set_grant_read(grants.read.clone())
            .set_grant_full_control(grants.full_control.clone())
            .set_grant_read_acp(grants.read_acp.clone())
            .set_grant_write_acp(grants.write_acp.clone())
            .set_website_redirect_location(attributes.website_redirect.clone())
    }};
}

/// Static access keys, used instead of the SDK's provider chain
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

/// How to reach the backend
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Custom endpoint for S3-compatible services
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    /// Use path-style addressing (`endpoint/bucket/key`)
    pub force_path_style: bool,
    pub credentials: Option<StaticCredentials>,
}

impl ClientConfig {
    /// Reject endpoints that are not absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint_url {
            let url = url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("Invalid endpoint URL '{endpoint}': {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "Endpoint URL must use http or https: {endpoint}"
                )));
            }
        }
        Ok(())
    }
}

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
}

impl S3Client {
    /// Create a new S3 client
    pub async fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let region = RegionProviderChain::first_try(config.region.clone().map(aws_config::Region::new))
            .or_default_provider()
            .or_else(DEFAULT_REGION);

        // The engine owns retries; SDK-level retries would hide attempts from it
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .retry_config(aws_config::retry::RetryConfig::disabled());

        if let Some(creds) = &config.credentials {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                &creds.access_key,
                &creds.secret_key,
                creds.session_token.clone(),
                None,
                "objsync-static-credentials",
            ));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        tracing::debug!(
            endpoint = ?config.endpoint_url,
            path_style = config.force_path_style,
            "S3 client configured"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }
}

fn to_timestamp(dt: &aws_smithy_types::DateTime) -> Option<Timestamp> {
    Timestamp::from_second(dt.secs()).ok()
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// `bucket/key` with each key segment percent-encoded
fn copy_source(src: &RemotePath) -> String {
    let key: Vec<_> = src.key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", src.bucket, key.join("/"))
}

fn content_length(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| Error::Request(format!("Body too large: {size} bytes")))
}

fn part_number(index: u32) -> Result<i32> {
    i32::try_from(index).map_err(|_| Error::Request(format!("Part number out of range: {index}")))
}

/// Buffer an engine body for the SDK.
///
/// Bodies are at most one part (or one sub-threshold object) long.
async fn to_sdk_body(body: ByteStream, size: u64) -> Result<SdkByteStream> {
    Ok(SdkByteStream::from(collect_body(body, size).await?))
}

fn from_sdk_body(body: SdkByteStream) -> ByteStream {
    futures::stream::unfold(body, |mut body| async move {
        body.next()
            .await
            .map(|chunk| (chunk.map_err(|e| Error::Transport(e.to_string())), body))
    })
    .boxed()
}

#[async_trait]
impl StorageClient for S3Client {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        let mut request = self.inner.list_objects_v2().bucket(&path.bucket);

        if !path.key.is_empty() {
            request = request.prefix(&path.key);
        }
        if let Some(max) = options.max_keys {
            request = request.max_keys(max);
        }
        if let Some(token) = &options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;

        let items = response
            .contents()
            .iter()
            .map(|object| {
                let key = object.key().unwrap_or_default();
                let size = u64::try_from(object.size().unwrap_or(0)).unwrap_or(0);
                let mut info = ObjectInfo::new(key, size);
                info.last_modified = object.last_modified().and_then(to_timestamp);
                info.etag = object.e_tag().map(trim_etag);
                info
            })
            .collect();

        Ok(ListResult {
            items,
            truncated: response.is_truncated().unwrap_or(false),
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        let response = self
            .inner
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;

        let size = u64::try_from(response.content_length().unwrap_or(0)).unwrap_or(0);
        let mut info = ObjectInfo::new(&path.key, size);
        info.last_modified = response.last_modified().and_then(to_timestamp);
        info.etag = response.e_tag().map(trim_etag);
        info.content_type = response.content_type().map(str::to_string);
        info.cache_control = response.cache_control().map(str::to_string);
        info.content_disposition = response.content_disposition().map(str::to_string);
        info.content_encoding = response.content_encoding().map(str::to_string);
        info.content_language = response.content_language().map(str::to_string);
        Ok(info)
    }

    async fn get_object(&self, path: &RemotePath, range: Option<ByteRange>) -> Result<ByteStream> {
        let mut request = self.inner.get_object().bucket(&path.bucket).key(&path.key);
        if let Some(range) = range {
            request = request.range(range.to_http_range());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;

        Ok(from_sdk_body(response.body))
    }

    async fn put_object(
        &self,
        path: &RemotePath,
        body: ByteStream,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> Result<()> {
        let request = self
            .inner
            .put_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .content_length(content_length(size)?)
            .body(to_sdk_body(body, size).await?);

        with_attributes!(request, attributes)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src: &RemotePath,
        dst: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<()> {
        let request = self
            .inner
            .copy_object()
            .copy_source(copy_source(src))
            .bucket(&dst.bucket)
            .key(&dst.key);
        let request = if attributes.replaces_metadata() {
            request.metadata_directive(MetadataDirective::Replace)
        } else {
            request
        };

        with_attributes!(request, attributes)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &src.to_string()))?;
        Ok(())
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;
        Ok(())
    }

    async fn create_multipart(
        &self,
        path: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        let request = self
            .inner
            .create_multipart_upload()
            .bucket(&path.bucket)
            .key(&path.key);

        let response = with_attributes!(request, attributes)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;

        response
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| Error::Request(format!("{path}: response carried no upload id")))
    }

    async fn upload_part(
        &self,
        path: &RemotePath,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        size: u64,
    ) -> Result<String> {
        let response = self
            .inner
            .upload_part()
            .bucket(&path.bucket)
            .key(&path.key)
            .upload_id(upload_id)
            .part_number(self::part_number(part_number)?)
            .content_length(content_length(size)?)
            .body(to_sdk_body(body, size).await?)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{path} part {part_number}")))?;

        response
            .e_tag()
            .map(trim_etag)
            .ok_or_else(|| Error::Request(format!("{path} part {part_number}: missing ETag")))
    }

    async fn upload_part_copy(
        &self,
        src: &RemotePath,
        dst: &RemotePath,
        upload_id: &str,
        part_number: u32,
        range: ByteRange,
    ) -> Result<String> {
        let response = self
            .inner
            .upload_part_copy()
            .copy_source(copy_source(src))
            .copy_source_range(range.to_http_range())
            .bucket(&dst.bucket)
            .key(&dst.key)
            .upload_id(upload_id)
            .part_number(self::part_number(part_number)?)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &format!("{dst} part {part_number}")))?;

        response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(trim_etag)
            .ok_or_else(|| Error::Request(format!("{dst} part {part_number}: missing ETag")))
    }

    async fn complete_multipart(
        &self,
        path: &RemotePath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                Ok(SdkCompletedPart::builder()
                    .part_number(self::part_number(part.part_number)?)
                    .e_tag(part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.inner
            .complete_multipart_upload()
            .bucket(&path.bucket)
            .key(&path.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;
        Ok(())
    }

    async fn abort_multipart(&self, path: &RemotePath, upload_id: &str) -> Result<()> {
        self.inner
            .abort_multipart_upload()
            .bucket(&path.bucket)
            .key(&path.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &path.to_string()))?;
        Ok(())
    }
}
