//! Bookkeeping for in-flight screen recordings.
//!
//! A recording is an external capture process (`adb shell screenrecord`,
//! `simctl io recordVideo`) identified by an opaque id handed back to the
//! caller. The [`RecordingRegistry`] owns every live capture process and is
//! shared between drivers through an `Arc`.
//!
//! Stopping is two-phase. The entry is validated and removed under a single
//! lock acquisition, so a given id can be stopped at most once and a failed
//! retrieval never leaves a stale entry behind. The process is then
//! interrupted, awaited, and the file retrieved outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::DriverError;
use crate::process::CaptureProcess;

/// Errors raised when looking up a recording.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// No recording is registered under the id.
    #[error("Recording \"{0}\" was not found. It may already have been stopped; start a new recording.")]
    NotFound(String),

    /// The recording was started on a different device.
    #[error("Recording \"{id}\" belongs to device \"{owner}\", not \"{device_id}\". Stop it from the device that started it.")]
    OwnershipMismatch {
        id: String,
        owner: String,
        device_id: String,
    },
}

/// A running capture.
pub struct Recording {
    pub id: String,
    /// Device that started the capture.
    pub device_id: String,
    /// Where the capture process writes the video (on-device path for
    /// Android, host path for simulators).
    pub source_path: String,
    /// Where the finished video ends up on the host.
    pub destination_path: PathBuf,
    process: Box<dyn CaptureProcess>,
}

impl Recording {
    pub fn new(
        id: String,
        device_id: impl Into<String>,
        source_path: impl Into<String>,
        destination_path: PathBuf,
        process: Box<dyn CaptureProcess>,
    ) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            source_path: source_path.into(),
            destination_path,
            process,
        }
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("source_path", &self.source_path)
            .field("destination_path", &self.destination_path)
            .field("pid", &self.process.pid())
            .finish()
    }
}

/// Generates a fresh recording id (32 lowercase hex characters).
pub fn new_recording_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Process-wide table of running recordings.
///
/// Dropping the registry drops every capture process it still owns, which
/// kills them.
#[derive(Default)]
pub struct RecordingRegistry {
    entries: Mutex<HashMap<String, Recording>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started recording.
    pub async fn insert(&self, recording: Recording) {
        info!(id = %recording.id, device_id = %recording.device_id, "recording started");
        self.entries.lock().await.insert(recording.id.clone(), recording);
    }

    /// Validate ownership and remove the entry in one step.
    ///
    /// On [`RecordingError::OwnershipMismatch`] the entry stays registered.
    pub async fn take(&self, id: &str, device_id: &str) -> Result<Recording, RecordingError> {
        let mut entries = self.entries.lock().await;
        match entries.get(id) {
            None => Err(RecordingError::NotFound(id.to_string())),
            Some(recording) if recording.device_id != device_id => {
                Err(RecordingError::OwnershipMismatch {
                    id: id.to_string(),
                    owner: recording.device_id.clone(),
                    device_id: device_id.to_string(),
                })
            }
            Some(_) => entries
                .remove(id)
                .ok_or_else(|| RecordingError::NotFound(id.to_string())),
        }
    }

    /// Stop a recording and retrieve its file.
    ///
    /// After the entry is taken, the capture process is interrupted and
    /// awaited, the `settle` delay elapses, and `retrieve(source, destination)`
    /// moves the video into place. Returns the destination path.
    ///
    /// Interrupt and wait failures are logged; retrieval runs regardless and
    /// its outcome is the result.
    pub async fn stop<F, Fut>(
        &self,
        id: &str,
        device_id: &str,
        settle: Duration,
        retrieve: F,
    ) -> Result<PathBuf, DriverError>
    where
        F: FnOnce(String, PathBuf) -> Fut + Send,
        Fut: Future<Output = Result<(), DriverError>> + Send,
    {
        let Recording {
            source_path,
            destination_path,
            mut process,
            ..
        } = self.take(id, device_id).await?;

        // The capture may already be gone; the file is still worth fetching.
        debug!(id, pid = ?process.pid(), "interrupting capture process");
        if let Err(e) = process.interrupt() {
            warn!(id, error = %e, "failed to interrupt capture process");
        }
        if let Err(e) = process.wait().await {
            warn!(id, error = %e, "failed to wait for capture process");
        }
        drop(process);

        tokio::time::sleep(settle).await;
        retrieve(source_path, destination_path.clone()).await?;

        info!(id, path = %destination_path.display(), "recording stopped");
        Ok(destination_path)
    }

    /// Number of recordings still running.
    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Signals {
        interrupts: AtomicUsize,
        waits: AtomicUsize,
    }

    struct FakeCapture(Arc<Signals>);

    /// A capture whose process already vanished.
    struct LostCapture(Arc<Signals>);

    #[async_trait]
    impl CaptureProcess for LostCapture {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn interrupt(&mut self) -> Result<(), DriverError> {
            self.0.interrupts.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
        }

        async fn wait(&mut self) -> Result<(), DriverError> {
            self.0.waits.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::Timeout("screenrecord".into()))
        }
    }

    #[async_trait]
    impl CaptureProcess for FakeCapture {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn interrupt(&mut self) -> Result<(), DriverError> {
            self.0.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait(&mut self) -> Result<(), DriverError> {
            self.0.waits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recording(id: &str, device: &str, signals: &Arc<Signals>) -> Recording {
        Recording::new(
            id.to_string(),
            device,
            format!("/sdcard/mobot-{id}.mp4"),
            PathBuf::from(format!("/tmp/mobot-{id}.mp4")),
            Box::new(FakeCapture(signals.clone())),
        )
    }

    async fn ok_retrieve(_: String, _: PathBuf) -> Result<(), DriverError> {
        Ok(())
    }

    #[test]
    fn ids_are_32_hex_chars() {
        let id = new_recording_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_recording_id());
    }

    #[tokio::test]
    async fn stop_unknown_id_is_not_found() {
        let registry = RecordingRegistry::new();
        let err = registry
            .stop("missing", "emulator-5554", Duration::ZERO, ok_retrieve)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Recording(RecordingError::NotFound(_))));
        assert!(err.is_actionable());
    }

    #[tokio::test]
    async fn ownership_mismatch_leaves_entry_and_process_untouched() {
        let registry = RecordingRegistry::new();
        let signals = Arc::new(Signals::default());
        registry.insert(recording("abc", "device-a", &signals)).await;

        let err = registry
            .stop("abc", "device-b", Duration::ZERO, ok_retrieve)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::Recording(RecordingError::OwnershipMismatch { .. })
        ));
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(signals.interrupts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_interrupts_waits_and_retrieves() {
        let registry = RecordingRegistry::new();
        let signals = Arc::new(Signals::default());
        registry.insert(recording("abc", "device-a", &signals)).await;

        let retrieved = Arc::new(std::sync::Mutex::new(None));
        let seen = retrieved.clone();
        let path = registry
            .stop("abc", "device-a", Duration::from_millis(1), move |src, dst| async move {
                *seen.lock().unwrap() = Some((src, dst));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(path, PathBuf::from("/tmp/mobot-abc.mp4"));
        assert_eq!(signals.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(signals.waits.load(Ordering::SeqCst), 1);
        assert_eq!(
            retrieved.lock().unwrap().clone(),
            Some(("/sdcard/mobot-abc.mp4".to_string(), path))
        );
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn failed_retrieval_still_removes_entry() {
        let registry = RecordingRegistry::new();
        let signals = Arc::new(Signals::default());
        registry.insert(recording("abc", "device-a", &signals)).await;

        let err = registry
            .stop("abc", "device-a", Duration::ZERO, |_, _| async {
                Err(DriverError::CommandFailed("adb pull".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::CommandFailed(_)));
        assert_eq!(registry.active_count().await, 0);

        let again = registry
            .stop("abc", "device-a", Duration::ZERO, ok_retrieve)
            .await
            .unwrap_err();
        assert!(matches!(again, DriverError::Recording(RecordingError::NotFound(_))));
    }

    #[tokio::test]
    async fn process_failures_do_not_skip_retrieval() {
        let registry = RecordingRegistry::new();
        let signals = Arc::new(Signals::default());
        registry
            .insert(Recording::new(
                "abc".to_string(),
                "device-a",
                "/sdcard/mobot-abc.mp4".to_string(),
                PathBuf::from("/tmp/mobot-abc.mp4"),
                Box::new(LostCapture(signals.clone())),
            ))
            .await;

        let retrieved = Arc::new(AtomicUsize::new(0));
        let seen = retrieved.clone();
        let path = registry
            .stop("abc", "device-a", Duration::ZERO, move |_, _| async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(path, PathBuf::from("/tmp/mobot-abc.mp4"));
        assert_eq!(signals.interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(signals.waits.load(Ordering::SeqCst), 1);
        assert_eq!(retrieved.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_stops_succeed_at_most_once() {
        let registry = Arc::new(RecordingRegistry::new());
        let signals = Arc::new(Signals::default());
        registry.insert(recording("abc", "device-a", &signals)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .stop("abc", "device-a", Duration::from_millis(5), ok_retrieve)
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, DriverError::Recording(RecordingError::NotFound(_)))),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(signals.interrupts.load(Ordering::SeqCst), 1);
    }
}
