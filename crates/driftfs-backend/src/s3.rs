//! S3-compatible backend built on `aws-sdk-s3`.
//!
//! Talks to any S3-style service (AWS, MinIO, Ceph RGW) with static
//! credentials and path-style addressing, which is what self-hosted
//! deployments expect.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::io::AsyncReadExt;
use tracing::error;

use driftfs_types::{make_error_msg, status_code::BackendCode, Result, Status};

use crate::{Metadata, MultipartUpload, Object, ObjectStorage, Part};

const MIN_PART_SIZE: usize = 5 << 20;
const MAX_PART_COUNT: i32 = 10_000;

/// Connection options for an S3-compatible service.
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub fn new(options: &S3Options) -> Self {
        let credentials = Credentials::new(
            options.access_key.clone(),
            options.secret_key.clone(),
            None,
            None,
            "driftfs-static",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        if !options.endpoint.is_empty() {
            builder = builder.endpoint_url(options.endpoint.clone());
        }
        Self {
            client: Client::from_conf(builder.build()),
            bucket: options.bucket.clone(),
        }
    }

    fn mtime_from(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> SystemTime {
        match dt {
            Some(dt) if dt.secs() >= 0 => UNIX_EPOCH + Duration::from_secs(dt.secs() as u64),
            _ => UNIX_EPOCH,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Backend {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn create(&self) -> Result<()> {
        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(se) = e.as_service_error() {
                    if se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists() {
                        return Ok(());
                    }
                }
                error!("create bucket {} failed: {}", self.bucket, e);
                make_error_msg(BackendCode::BUCKET_CREATE_FAILED, e.to_string())
            }
        }
    }

    async fn head(&self, key: &str) -> Result<Object> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Status::with_message(BackendCode::HEAD_FAILED, e.to_string()))?;
        Ok(Object {
            key: key.to_string(),
            size: out.content_length().unwrap_or(0),
            mtime: Self::mtime_from(out.last_modified()),
            is_dir: key.ends_with('/'),
            metadata: out.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get(&self, key: &str, off: i64, limit: i64, buf: &mut [u8]) -> Result<usize> {
        let mut req = self.client.get_object().bucket(&self.bucket).key(key);
        if off > 0 || limit > 0 {
            let range = if limit > 0 {
                format!("bytes={}-{}", off, off + limit - 1)
            } else {
                format!("bytes={}-", off)
            };
            req = req.range(range);
        }
        let out = req.send().await.map_err(|e| {
            error!("get {} failed: {}", key, e);
            Status::with_message(BackendCode::GET_FAILED, e.to_string())
        })?;

        let mut reader = out.body.into_async_read();
        let mut n = 0;
        while n < buf.len() {
            let m = reader
                .read(&mut buf[n..])
                .await
                .map_err(|e| Status::with_message(BackendCode::GET_FAILED, e.to_string()))?;
            if m == 0 {
                break;
            }
            n += m;
        }
        Ok(n)
    }

    async fn put(&self, key: &str, metadata: Metadata, body: &[u8]) -> Result<()> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()));
        for (k, v) in metadata {
            req = req.metadata(k, v);
        }
        req.send().await.map_err(|e| {
            error!("put {} failed: {}", key, e);
            Status::with_message(BackendCode::PUT_FAILED, e.to_string())
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Status::with_message(BackendCode::DELETE_FAILED, e.to_string()))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let objects = self.list(prefix).await?;
        if objects.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(objects.len());
        for o in &objects {
            let id = ObjectIdentifier::builder()
                .key(&o.key)
                .build()
                .map_err(|e| Status::with_message(BackendCode::DELETE_FAILED, e.to_string()))?;
            ids.push(id);
        }
        let delete = Delete::builder()
            .set_objects(Some(ids))
            .build()
            .map_err(|e| Status::with_message(BackendCode::DELETE_FAILED, e.to_string()))?;
        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                error!("delete prefix {} failed: {}", prefix, e);
                Status::with_message(BackendCode::DELETE_FAILED, e.to_string())
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Object>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let out = req
                .send()
                .await
                .map_err(|e| Status::with_message(BackendCode::LIST_FAILED, e.to_string()))?;
            for o in out.contents() {
                let key = o.key().unwrap_or_default().to_string();
                objects.push(Object {
                    size: o.size().unwrap_or(0),
                    mtime: Self::mtime_from(o.last_modified()),
                    is_dir: key.ends_with('/'),
                    metadata: Metadata::new(),
                    key,
                });
            }
            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn initiate_multipart(&self, key: &str) -> Result<MultipartUpload> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!("initiate multipart {} failed: {}", key, e);
                Status::with_message(BackendCode::MULTIPART_INIT_FAILED, e.to_string())
            })?;
        Ok(MultipartUpload {
            min_part_size: MIN_PART_SIZE,
            max_count: MAX_PART_COUNT,
            upload_id: out.upload_id().unwrap_or_default().to_string(),
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        num: i32,
        body: &[u8],
    ) -> Result<Part> {
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(num)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|e| {
                error!("upload part {} of {} failed: {}", num, key, e);
                Status::with_message(BackendCode::PART_UPLOAD_FAILED, e.to_string())
            })?;
        Ok(Part {
            num,
            size: body.len(),
            etag: out.e_tag().unwrap_or_default().to_string(),
        })
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[Part]) -> Result<()> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.num)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                error!("complete multipart {} failed: {}", key, e);
                Status::with_message(BackendCode::MULTIPART_COMPLETE_FAILED, e.to_string())
            })?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                error!("abort multipart {} failed: {}", key, e);
                Status::with_message(BackendCode::MULTIPART_ABORT_FAILED, e.to_string())
            })?;
        Ok(())
    }
}
