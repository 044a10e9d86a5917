use std::fs::{self, File};
use std::io::{self, Write};

use camino::Utf8PathBuf;

use crate::blob::BlobStore;
use crate::domain::ObjectKey;
use crate::error::HarvestError;
use crate::guard::{CancelToken, ConcurrencyToken};
use crate::store::TargetDir;

/// Terminal result of one retrieval.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub key: ObjectKey,
    pub local_path: Utf8PathBuf,
    pub bytes: u64,
    pub error: Option<HarvestError>,
}

impl RetrievalOutcome {
    pub fn succeeded(key: ObjectKey, local_path: Utf8PathBuf, bytes: u64) -> Self {
        Self {
            key,
            local_path,
            bytes,
            error: None,
        }
    }

    pub fn failed(key: ObjectKey, local_path: Utf8PathBuf, error: HarvestError) -> Self {
        Self {
            key,
            local_path,
            bytes: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches one object into the target directory while holding a token.
pub struct RetrievalTask<'g> {
    key: ObjectKey,
    token: ConcurrencyToken<'g>,
}

impl<'g> RetrievalTask<'g> {
    pub fn new(key: ObjectKey, token: ConcurrencyToken<'g>) -> Self {
        Self { key, token }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// The token is released before the outcome is returned, on every path.
    pub fn run<B: BlobStore + ?Sized>(
        self,
        store: &B,
        target: &TargetDir,
        cancel: &CancelToken,
    ) -> RetrievalOutcome {
        let RetrievalTask { key, token } = self;
        let local_path = target.file_path(key.file_name());
        let result = retrieve(&key, store, target, cancel);
        token.release();
        match result {
            Ok(bytes) => RetrievalOutcome::succeeded(key, local_path, bytes),
            Err(err) => RetrievalOutcome::failed(key, local_path, err),
        }
    }
}

fn retrieve<B: BlobStore + ?Sized>(
    key: &ObjectKey,
    store: &B,
    target: &TargetDir,
    cancel: &CancelToken,
) -> Result<u64, HarvestError> {
    let file_name = key.file_name();
    if matches!(file_name, "" | "." | "..") {
        return Err(HarvestError::InvalidKey(key.to_string()));
    }
    cancel.check()?;

    let local_path = target.file_path(file_name);
    let mut sink = TrackedFile::new(target.create_file(file_name)?);
    match store.fetch(key, &mut sink, cancel) {
        Ok(bytes) => Ok(bytes),
        Err(err) => {
            drop(sink.file);
            if let Err(remove_err) = fs::remove_file(local_path.as_std_path()) {
                tracing::debug!(path = %local_path, "leaving partial file: {remove_err}");
            }
            // A failed local write surfaces through the transfer; report the real cause.
            match sink.write_error {
                Some(message) => Err(HarvestError::LocalIo {
                    path: local_path.to_string(),
                    message,
                }),
                None => Err(err),
            }
        }
    }
}

/// Remembers the first local write failure so it is not mistaken for a
/// remote one.
struct TrackedFile {
    file: File,
    write_error: Option<String>,
}

impl TrackedFile {
    fn new(file: File) -> Self {
        Self {
            file,
            write_error: None,
        }
    }

    fn record<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if let Err(err) = &result {
            if self.write_error.is_none() {
                self.write_error = Some(err.to_string());
            }
        }
        result
    }
}

impl Write for TrackedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.file.write(buf);
        self.record(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.file.flush();
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::guard::ConcurrencyGuard;

    struct StaticStore(&'static [u8]);

    impl BlobStore for StaticStore {
        fn fetch(
            &self,
            _key: &ObjectKey,
            sink: &mut dyn Write,
            cancel: &CancelToken,
        ) -> Result<u64, HarvestError> {
            crate::blob::copy_with_cancel(self.0, sink, cancel)
        }
    }

    struct MissingStore;

    impl BlobStore for MissingStore {
        fn fetch(
            &self,
            key: &ObjectKey,
            _sink: &mut dyn Write,
            _cancel: &CancelToken,
        ) -> Result<u64, HarvestError> {
            Err(HarvestError::ObjectNotFound(key.to_string()))
        }
    }

    fn target() -> (tempfile::TempDir, TargetDir) {
        let temp = tempfile::tempdir().unwrap();
        let target = TargetDir::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, target)
    }

    #[test]
    fn writes_object_under_last_segment() {
        let (_temp, target) = target();
        let guard = ConcurrencyGuard::new(1).unwrap();
        let cancel = CancelToken::new();
        let token = guard.acquire(&cancel).unwrap();

        let task = RetrievalTask::new(ObjectKey::new("a/b/c.wav"), token);
        let outcome = task.run(&StaticStore(b"RIFF"), &target, &cancel);

        assert!(outcome.is_success());
        assert_eq!(outcome.bytes, 4);
        assert!(outcome.local_path.ends_with("c.wav"));
        assert_eq!(fs::read(outcome.local_path.as_std_path()).unwrap(), b"RIFF");
        assert_eq!(guard.available(), 1);
    }

    #[test]
    fn remote_failure_releases_token_and_removes_partial_file() {
        let (_temp, target) = target();
        let guard = ConcurrencyGuard::new(1).unwrap();
        let cancel = CancelToken::new();
        let token = guard.acquire(&cancel).unwrap();

        let outcome = RetrievalTask::new(ObjectKey::new("x/gone.wav"), token).run(
            &MissingStore,
            &target,
            &cancel,
        );

        assert_matches!(outcome.error, Some(HarvestError::ObjectNotFound(_)));
        assert!(!outcome.local_path.as_std_path().exists());
        assert_eq!(guard.available(), 1);
    }

    #[test]
    fn missing_directory_is_a_local_failure() {
        let (temp, _) = target();
        let target = TargetDir::from_path_buf(temp.path().join("does-not-exist")).unwrap();
        let guard = ConcurrencyGuard::new(1).unwrap();
        let cancel = CancelToken::new();
        let token = guard.acquire(&cancel).unwrap();

        let outcome =
            RetrievalTask::new(ObjectKey::new("a/b.wav"), token).run(&StaticStore(b""), &target, &cancel);

        assert_matches!(outcome.error, Some(HarvestError::LocalIo { .. }));
        assert_eq!(guard.available(), 1);
    }

    #[test]
    fn key_without_file_name_is_rejected() {
        let (_temp, target) = target();
        let guard = ConcurrencyGuard::new(1).unwrap();
        let cancel = CancelToken::new();
        let token = guard.acquire(&cancel).unwrap();

        let outcome =
            RetrievalTask::new(ObjectKey::new("a/b/"), token).run(&StaticStore(b""), &target, &cancel);

        assert_matches!(outcome.error, Some(HarvestError::InvalidKey(_)));
        assert_eq!(guard.available(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_local_write_mid_stream_is_local_io() {
        let device = std::path::Path::new("/dev/full");
        if !device.exists() {
            return;
        }
        let (_temp, target) = target();
        // Every write to /dev/full fails with ENOSPC after the open succeeds.
        std::os::unix::fs::symlink(device, target.file_path("c.wav").as_std_path()).unwrap();
        let guard = ConcurrencyGuard::new(1).unwrap();
        let cancel = CancelToken::new();
        let token = guard.acquire(&cancel).unwrap();

        let outcome = RetrievalTask::new(ObjectKey::new("a/b/c.wav"), token).run(
            &StaticStore(b"RIFF"),
            &target,
            &cancel,
        );

        assert_matches!(
            outcome.error,
            Some(HarvestError::LocalIo { ref path, .. }) if path.ends_with("c.wav")
        );
        assert_eq!(
            outcome.error.as_ref().map(HarvestError::kind),
            Some(crate::error::ErrorKind::LocalIo)
        );
        assert!(!target.file_path("c.wav").as_std_path().exists());
        assert_eq!(guard.available(), 1);
    }
}
