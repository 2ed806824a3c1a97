//! A single S3 client handle, preconfigured with endpoint and static
//! credentials.
//!
//! Grounded on `zarr::S3Connection` (`src/internal/s3.connection.hh`/`.cpp`
//! in the original driver, which wraps `minio::s3::Client`). The original
//! driver links against MinIO's C++ SDK; we use `aws-sdk-s3` instead, which
//! three of the example repos in this pack already depend on for the same
//! purpose and which speaks the same S3 API against any compatible
//! endpoint. The SDK is async; this crate's write path is synchronous, so
//! every method here blocks the calling (pool worker) thread on a shared
//! background Tokio runtime via `Handle::block_on`, the same bridge pattern
//! used wherever this pack calls async AWS clients from a sync context.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::runtime::Handle;

use crate::error::{Result, ZarrError};

pub struct S3Connection {
    client: aws_sdk_s3::Client,
    rt: Handle,
}

impl S3Connection {
    pub(super) fn new(
        rt: Handle,
        endpoint: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "zarrite",
        );
        let config = rt.block_on(
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .endpoint_url(endpoint)
                .credentials_provider(credentials)
                .region(aws_config::Region::new("us-east-1"))
                .load(),
        );
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);
        S3Connection { client, rt }
    }

    pub fn bucket_exists(&self, bucket_name: &str) -> Result<bool> {
        match self
            .rt
            .block_on(self.client.head_bucket().bucket(bucket_name).send())
        {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.err().is_not_found() => {
                Ok(false)
            }
            Err(e) => Err(ZarrError::IoError(format!(
                "head_bucket({bucket_name}) failed: {e}"
            ))),
        }
    }

    /// Upload the whole object in a single `PutObject` call. Returns the
    /// etag.
    pub fn put_object(&self, bucket_name: &str, object_key: &str, data: &[u8]) -> Result<String> {
        if bucket_name.is_empty() || object_key.is_empty() || data.is_empty() {
            return Err(ZarrError::InvalidArgument(
                "put_object requires a non-empty bucket, key, and body".into(),
            ));
        }
        let body = ByteStream::from(data.to_vec());
        let output = self
            .rt
            .block_on(
                self.client
                    .put_object()
                    .bucket(bucket_name)
                    .key(object_key)
                    .body(body)
                    .send(),
            )
            .map_err(|e| ZarrError::IoError(format!("put_object({object_key}) failed: {e}")))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| ZarrError::IoError(format!("put_object({object_key}) returned no etag")))
    }

    pub fn create_multipart_object(&self, bucket_name: &str, object_key: &str) -> Result<String> {
        if bucket_name.is_empty() || object_key.is_empty() {
            return Err(ZarrError::InvalidArgument(
                "create_multipart_object requires a non-empty bucket and key".into(),
            ));
        }
        let output = self
            .rt
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(bucket_name)
                    .key(object_key)
                    .send(),
            )
            .map_err(|e| {
                ZarrError::IoError(format!(
                    "create_multipart_upload({object_key}) failed: {e}"
                ))
            })?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            ZarrError::IoError(format!(
                "create_multipart_upload({object_key}) returned no upload id"
            ))
        })
    }

    /// Upload one part and return its etag. `part_number` is 1-based.
    pub fn upload_multipart_object_part(
        &self,
        bucket_name: &str,
        object_key: &str,
        upload_id: &str,
        data: &[u8],
        part_number: i32,
    ) -> Result<String> {
        if bucket_name.is_empty() || object_key.is_empty() || data.is_empty() || part_number < 1 {
            return Err(ZarrError::InvalidArgument(
                "upload_multipart_object_part requires a non-empty bucket, key, body, and part_number >= 1".into(),
            ));
        }
        let body = ByteStream::from(data.to_vec());
        let output = self
            .rt
            .block_on(
                self.client
                    .upload_part()
                    .bucket(bucket_name)
                    .key(object_key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(body)
                    .send(),
            )
            .map_err(|e| {
                ZarrError::IoError(format!(
                    "upload_part({object_key}, part {part_number}) failed: {e}"
                ))
            })?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            ZarrError::IoError(format!(
                "upload_part({object_key}, part {part_number}) returned no etag"
            ))
        })
    }

    pub fn complete_multipart_object(
        &self,
        bucket_name: &str,
        object_key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|(number, etag)| {
                CompletedPart::builder()
                    .part_number(*number)
                    .e_tag(etag)
                    .build()
            })
            .collect();

        self.rt
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket_name)
                    .key(object_key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(completed_parts))
                            .build(),
                    )
                    .send(),
            )
            .map_err(|e| {
                ZarrError::IoError(format!(
                    "complete_multipart_upload({object_key}) failed: {e}"
                ))
            })?;
        Ok(())
    }
}
