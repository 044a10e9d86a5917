use std::io::{Read, Write};
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::ObjectKey;
use crate::error::HarvestError;
use crate::guard::CancelToken;

pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const CHUNK_SIZE: usize = 64 * 1024;

/// Everything but the RFC 3986 unreserved characters is escaped in a key segment.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Remote store that can stream one object into a writer.
///
/// Implementations are shared by every worker of a batch and must tolerate at
/// least as many concurrent calls as the batch concurrency.
pub trait BlobStore: Send + Sync {
    fn fetch(
        &self,
        key: &ObjectKey,
        sink: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, HarvestError>;
}

/// Unsigned GETs against a base URL: public buckets, proxies, presigned stores.
#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("clip-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::BlobHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::BlobHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Each `/`-separated segment of the key is percent-encoded on its own so
    /// `?`, `#` and `%` stay part of the object name.
    pub fn object_url(&self, key: &ObjectKey) -> String {
        let path = key
            .as_str()
            .trim_start_matches('/')
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{path}", self.base_url)
    }

    fn handle_status(
        key: &ObjectKey,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "blob store request failed".to_string());
        Err(status_error(key, status.as_u16(), message))
    }
}

impl BlobStore for HttpBlobStore {
    fn fetch(
        &self,
        key: &ObjectKey,
        sink: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<u64, HarvestError> {
        cancel.check()?;
        let url = self.object_url(key);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HarvestError::BlobHttp(err.to_string()))?;
        let response = Self::handle_status(key, response)?;
        copy_with_cancel(response, sink, cancel)
    }
}

/// Maps a non-success response status to the matching error.
pub(crate) fn status_error(key: &ObjectKey, status: u16, message: String) -> HarvestError {
    if status == 404 {
        HarvestError::ObjectNotFound(key.to_string())
    } else {
        HarvestError::BlobStatus { status, message }
    }
}

/// Streams `source` into `sink`, checking `cancel` between chunks.
pub fn copy_with_cancel<R: Read>(
    mut source: R,
    sink: &mut dyn Write,
    cancel: &CancelToken,
) -> Result<u64, HarvestError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        cancel.check()?;
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(HarvestError::BlobTransfer(err.to_string())),
        };
        sink.write_all(&buffer[..read])
            .map_err(|err| HarvestError::BlobTransfer(format!("write: {err}")))?;
        written += read as u64;
    }
    sink.flush()
        .map_err(|err| HarvestError::BlobTransfer(format!("flush: {err}")))?;
    Ok(written)
}
