//! Signed retrieval from S3.
//!
//! Credentials come from the AWS default chain (environment, shared profile,
//! web identity, instance metadata) and are resolved lazily on the first
//! request. Workers stay blocking: each `fetch` drives its request on a small
//! runtime shared by the whole batch.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use tokio::runtime::Runtime;

use crate::blob::{BlobStore, status_error};
use crate::domain::ObjectKey;
use crate::error::HarvestError;
use crate::guard::CancelToken;

const RUNTIME_WORKERS: usize = 2;

pub struct S3BlobStore {
    runtime: Runtime,
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3BlobStore {
    pub fn connect(
        bucket: &str,
        region: &str,
        request_timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name("s3-io")
            .enable_all()
            .build()
            .map_err(|err| HarvestError::BlobHttp(err.to_string()))?;

        let shared = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .timeout_config(
                    TimeoutConfig::builder()
                        .operation_timeout(request_timeout)
                        .build(),
                )
                .load(),
        );
        tracing::debug!(bucket, region, "s3 client ready");

        Ok(Self {
            runtime,
            client: Client::new(&shared),
            bucket: bucket.to_string(),
        })
    }
}

impl BlobStore for S3BlobStore {
    fn fetch(
        &self,
        key: &ObjectKey,
        sink: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, HarvestError> {
        cancel.check()?;
        self.runtime.block_on(within_deadline(cancel, async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key.as_str())
                .send()
                .await
                .map_err(|err| map_sdk_error(key, err))?;
            drain_body(output.body, sink, cancel).await
        }))
    }
}

fn map_sdk_error<E>(key: &ObjectKey, err: SdkError<E>) -> HarvestError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(service_err) => {
            status_error(key, service_err.raw().status().as_u16(), message)
        }
        _ => HarvestError::BlobHttp(message),
    }
}

/// Bounds `work` by the batch deadline, if there is one.
async fn within_deadline<T, F>(cancel: &CancelToken, work: F) -> Result<T, HarvestError>
where
    F: Future<Output = Result<T, HarvestError>>,
{
    match cancel.remaining() {
        Some(left) => tokio::time::timeout(left, work)
            .await
            .map_err(|_| HarvestError::Cancelled)?,
        None => work.await,
    }
}

async fn drain_body(
    mut body: ByteStream,
    sink: &mut dyn Write,
    cancel: &CancelToken,
) -> Result<u64, HarvestError> {
    let mut written = 0u64;
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(|err| HarvestError::BlobTransfer(DisplayErrorContext(&err).to_string()))?
    {
        cancel.check()?;
        sink.write_all(&chunk)
            .map_err(|err| HarvestError::BlobTransfer(format!("write: {err}")))?;
        written += chunk.len() as u64;
    }
    sink.flush()
        .map_err(|err| HarvestError::BlobTransfer(format!("flush: {err}")))?;
    Ok(written)
}
