// SPDX-License-Identifier: GPL-3.0-only

//! Mount orchestration for removable media.
//!
//! The manager owns the record of what this process mounted and where.
//! Records live in memory only: a restarted service deliberately
//! forgets mounts it did not perform.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::device::DeviceIdentity;
use crate::error::{KioskError, Result};
use crate::presentation::Presenter;

/// External mount utility. [`SystemMounter`] shells out to the real
/// tools; tests substitute a recording fake.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Attaches `device` at `target`. A non-zero utility exit becomes
    /// an error carrying the captured stderr.
    async fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    /// Detaches whatever is mounted at `target`.
    async fn umount(&self, target: &Path) -> Result<()>;
}

/// Invokes the system `mount`/`umount` binaries. Needs the privileges
/// the service normally runs with.
#[derive(Debug, Default)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, program: &str, args: &[&Path]) -> Result<std::process::Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| KioskError::CommandSpawn {
                command: program.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        let output = self.run("mount", &[device, target]).await?;
        if !output.status.success() {
            return Err(KioskError::MountFailed {
                device: device.display().to_string(),
                target: target.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn umount(&self, target: &Path) -> Result<()> {
        let output = self.run("umount", &[target]).await?;
        if !output.status.success() {
            return Err(KioskError::UnmountFailed {
                target: target.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Tunables for the mount manager. The waits are configurable so tests
/// can shorten them.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Directory under which per-device mount points are created.
    pub mount_base: PathBuf,
    /// Wait between viewer dismissal and the umount call, so the viewer
    /// can release its handles on the medium.
    pub unmount_grace: Duration,
    /// Per-operation bound during shutdown cleanup.
    pub cleanup_timeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_base: PathBuf::from("/mnt/kiosk"),
            unmount_grace: Duration::from_secs(2),
            cleanup_timeout: Duration::from_secs(10),
        }
    }
}

/// Tracks which devices this process mounted and where.
pub struct MountManager {
    config: MountConfig,
    mounter: Arc<dyn Mounter>,
    records: HashMap<PathBuf, PathBuf>,
}

impl MountManager {
    pub fn new(config: MountConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            config,
            mounter,
            records: HashMap::new(),
        }
    }

    /// Mount point `identity` maps to, recorded or not.
    pub fn mount_point_for(&self, identity: &DeviceIdentity) -> PathBuf {
        self.config.mount_base.join(&identity.label)
    }

    /// True if a mount record exists for the device node.
    pub fn is_mounted(&self, device_path: &Path) -> bool {
        self.records.contains_key(device_path)
    }

    pub fn mounted_count(&self) -> usize {
        self.records.len()
    }

    /// Mounts `identity` under the mount base and records it.
    ///
    /// A device that is already recorded is not mounted again; the
    /// recorded path is returned, so repeated add events can never
    /// produce two records for one device node. There is no retry on
    /// failure; re-insertion is the retry mechanism.
    pub async fn mount(&mut self, identity: &DeviceIdentity) -> Result<PathBuf> {
        if let Some(existing) = self.records.get(&identity.device_path) {
            debug!(
                device = %identity.device_path.display(),
                mount_point = %existing.display(),
                "device already mounted, keeping existing record"
            );
            return Ok(existing.clone());
        }

        let mount_point = self.mount_point_for(identity);
        fs::create_dir_all(&mount_point)?;

        self.mounter
            .mount(&identity.device_path, &mount_point)
            .await?;

        self.records
            .insert(identity.device_path.clone(), mount_point.clone());
        info!(
            device = %identity.device_path.display(),
            mount_point = %mount_point.display(),
            fs_type = identity.fs_type.as_deref().unwrap_or("unknown"),
            "mounted device"
        );
        Ok(mount_point)
    }

    /// Unmounts the device if a record exists.
    ///
    /// Returns `Ok(None)` when there is nothing to do, which covers
    /// duplicate and out-of-order remove events. Otherwise the viewer
    /// is dismissed first so the mount is not busy, and after a grace
    /// wait the utility runs. On success the record and the empty
    /// mount-point directory are removed; on utility failure the record
    /// stays in place and the error is returned.
    pub async fn unmount(
        &mut self,
        identity: &DeviceIdentity,
        presenter: &Presenter,
    ) -> Result<Option<PathBuf>> {
        let Some(mount_point) = self.records.get(&identity.device_path).cloned() else {
            debug!(
                device = %identity.device_path.display(),
                "no mount record, nothing to unmount"
            );
            return Ok(None);
        };

        presenter.dismiss().await;
        tokio::time::sleep(self.config.unmount_grace).await;

        self.mounter.umount(&mount_point).await?;
        self.records.remove(&identity.device_path);

        if let Err(e) = fs::remove_dir(&mount_point) {
            warn!(
                mount_point = %mount_point.display(),
                "could not remove mount point directory: {e}"
            );
        }
        info!(
            device = %identity.device_path.display(),
            mount_point = %mount_point.display(),
            "unmounted device"
        );
        Ok(Some(mount_point))
    }

    /// Drops the record for a device without touching the filesystem.
    ///
    /// Used when the device is physically gone but the unmount utility
    /// failed; the mount point stays behind and is reported by the
    /// caller.
    pub fn forget(&mut self, device_path: &Path) -> Option<PathBuf> {
        self.records.remove(device_path)
    }

    /// Best-effort unmount of everything still recorded, keyed by the
    /// recorded mount points.
    ///
    /// Each unmount is independently bounded by the cleanup timeout and
    /// each failure is logged and skipped, so one stuck device cannot
    /// block cleanup of the rest.
    pub async fn shutdown_cleanup(&mut self) {
        let records: Vec<(PathBuf, PathBuf)> = self.records.drain().collect();
        if records.is_empty() {
            return;
        }
        info!("cleaning up {} mounted device(s)", records.len());

        for (device_path, mount_point) in records {
            let attempt = tokio::time::timeout(
                self.config.cleanup_timeout,
                self.mounter.umount(&mount_point),
            )
            .await;
            match attempt {
                Ok(Ok(())) => {
                    if let Err(e) = fs::remove_dir(&mount_point) {
                        warn!(
                            mount_point = %mount_point.display(),
                            "could not remove mount point directory: {e}"
                        );
                    }
                    info!(
                        device = %device_path.display(),
                        mount_point = %mount_point.display(),
                        "unmounted during cleanup"
                    );
                }
                Ok(Err(e)) => {
                    warn!(device = %device_path.display(), "cleanup unmount failed: {e}");
                }
                Err(_) => {
                    warn!(device = %device_path.display(), "cleanup unmount timed out");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::presentation::{PresenterConfig, ViewerInstance, ViewerLauncher};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Mount(PathBuf, PathBuf),
        Umount(PathBuf),
        Sweep,
    }

    /// Shared call journal so ordering across the mounter and the
    /// viewer launcher can be asserted.
    #[derive(Default)]
    struct Journal(StdMutex<Vec<Call>>);

    impl Journal {
        fn push(&self, call: Call) {
            self.0.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }

        fn umount_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Umount(_)))
                .count()
        }
    }

    struct FakeMounter {
        journal: Arc<Journal>,
        fail_mounts: AtomicBool,
        fail_umounts: AtomicBool,
    }

    impl FakeMounter {
        fn new(journal: Arc<Journal>) -> Arc<Self> {
            Arc::new(Self {
                journal,
                fail_mounts: AtomicBool::new(false),
                fail_umounts: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Mounter for FakeMounter {
        async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
            self.journal
                .push(Call::Mount(device.to_path_buf(), target.to_path_buf()));
            if self.fail_mounts.load(Ordering::SeqCst) {
                return Err(KioskError::MountFailed {
                    device: device.display().to_string(),
                    target: target.display().to_string(),
                    stderr: "mount: unknown filesystem type 'xyz'".to_string(),
                });
            }
            Ok(())
        }

        async fn umount(&self, target: &Path) -> Result<()> {
            self.journal.push(Call::Umount(target.to_path_buf()));
            if self.fail_umounts.load(Ordering::SeqCst) {
                return Err(KioskError::UnmountFailed {
                    target: target.display().to_string(),
                    stderr: "umount: target is busy".to_string(),
                });
            }
            Ok(())
        }
    }

    struct JournalLauncher {
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl ViewerLauncher for JournalLauncher {
        async fn spawn_viewer(&self, _target: &Path) -> Result<ViewerInstance> {
            Ok(ViewerInstance::detached(4242))
        }

        async fn terminate_matching(&self) -> usize {
            self.journal.push(Call::Sweep);
            0
        }
    }

    struct Fixture {
        journal: Arc<Journal>,
        mounter: Arc<FakeMounter>,
        presenter: Presenter,
        manager: MountManager,
        _base: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let journal = Arc::new(Journal::default());
        let mounter = FakeMounter::new(journal.clone());
        let base = tempfile::tempdir().unwrap();
        let manager = MountManager::new(
            MountConfig {
                mount_base: base.path().to_path_buf(),
                unmount_grace: Duration::from_millis(1),
                cleanup_timeout: Duration::from_millis(50),
            },
            mounter.clone(),
        );
        let presenter = Presenter::new(
            PresenterConfig {
                marker_file: "index.html".to_string(),
                launch_settle: Duration::from_millis(1),
            },
            Arc::new(JournalLauncher {
                journal: journal.clone(),
            }),
        );
        Fixture {
            journal,
            mounter,
            presenter,
            manager,
            _base: base,
        }
    }

    fn identity(node: &str, label: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_path: PathBuf::from(node),
            label: label.to_string(),
            uuid: None,
            fs_type: Some("vfat".to_string()),
        }
    }

    #[tokio::test]
    async fn mount_records_device_under_labelled_mount_point() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        let mount_point = fx.manager.mount(&id).await.unwrap();

        assert_eq!(mount_point, fx.manager.mount_point_for(&id));
        assert!(mount_point.ends_with("usb_sdb1"));
        assert!(mount_point.is_dir());
        assert!(fx.manager.is_mounted(Path::new("/dev/sdb1")));
        assert_eq!(
            fx.journal.calls(),
            vec![Call::Mount(id.device_path.clone(), mount_point)]
        );
    }

    #[tokio::test]
    async fn second_mount_for_same_device_is_a_no_op() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "PHOTOS");

        let first = fx.manager.mount(&id).await.unwrap();
        let second = fx.manager.mount(&id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.manager.mounted_count(), 1);
        // utility invoked once only
        assert_eq!(fx.journal.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_mount_leaves_no_record_and_allows_retry() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        fx.mounter.fail_mounts.store(true, Ordering::SeqCst);
        let err = fx.manager.mount(&id).await.unwrap_err();
        assert!(matches!(err, KioskError::MountFailed { .. }));
        assert!(!fx.manager.is_mounted(&id.device_path));

        fx.mounter.fail_mounts.store(false, Ordering::SeqCst);
        fx.manager.mount(&id).await.unwrap();
        assert!(fx.manager.is_mounted(&id.device_path));
    }

    #[tokio::test]
    async fn unmount_round_trip_clears_record_and_directory() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        let mount_point = fx.manager.mount(&id).await.unwrap();
        let unmounted = fx.manager.unmount(&id, &fx.presenter).await.unwrap();

        assert_eq!(unmounted, Some(mount_point.clone()));
        assert!(!fx.manager.is_mounted(&id.device_path));
        assert!(!mount_point.exists());
    }

    #[tokio::test]
    async fn unmount_dismisses_viewer_before_calling_the_utility() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        fx.manager.mount(&id).await.unwrap();
        fx.manager.unmount(&id, &fx.presenter).await.unwrap();

        let calls = fx.journal.calls();
        let sweep_at = calls.iter().position(|c| matches!(c, Call::Sweep)).unwrap();
        let umount_at = calls
            .iter()
            .position(|c| matches!(c, Call::Umount(_)))
            .unwrap();
        assert!(sweep_at < umount_at);
    }

    #[tokio::test]
    async fn unmount_twice_calls_utility_at_most_once() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        fx.manager.mount(&id).await.unwrap();
        assert!(fx.manager.unmount(&id, &fx.presenter).await.unwrap().is_some());
        assert!(fx.manager.unmount(&id, &fx.presenter).await.unwrap().is_none());

        assert_eq!(fx.journal.umount_count(), 1);
    }

    #[tokio::test]
    async fn unmount_for_unknown_device_is_a_no_op() {
        let mut fx = fixture();
        let id = identity("/dev/sdz9", "usb_sdz9");

        let result = fx.manager.unmount(&id, &fx.presenter).await.unwrap();

        assert!(result.is_none());
        assert_eq!(fx.journal.umount_count(), 0);
    }

    #[tokio::test]
    async fn failed_unmount_retains_the_record() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        let mount_point = fx.manager.mount(&id).await.unwrap();
        fx.mounter.fail_umounts.store(true, Ordering::SeqCst);

        let err = fx.manager.unmount(&id, &fx.presenter).await.unwrap_err();

        assert!(matches!(err, KioskError::UnmountFailed { .. }));
        assert!(fx.manager.is_mounted(&id.device_path));
        assert!(mount_point.exists());
    }

    #[tokio::test]
    async fn forget_drops_the_record_without_unmounting() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        let mount_point = fx.manager.mount(&id).await.unwrap();
        let forgotten = fx.manager.forget(&id.device_path);

        assert_eq!(forgotten, Some(mount_point));
        assert!(!fx.manager.is_mounted(&id.device_path));
        assert_eq!(fx.journal.umount_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cleanup_attempts_every_record_despite_failures() {
        let mut fx = fixture();
        let first = identity("/dev/sdb1", "usb_sdb1");
        let second = identity("/dev/sdc1", "usb_sdc1");

        fx.manager.mount(&first).await.unwrap();
        fx.manager.mount(&second).await.unwrap();
        fx.mounter.fail_umounts.store(true, Ordering::SeqCst);

        fx.manager.shutdown_cleanup().await;

        assert_eq!(fx.journal.umount_count(), 2);
        assert_eq!(fx.manager.mounted_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cleanup_unmounts_by_recorded_mount_point() {
        let mut fx = fixture();
        let id = identity("/dev/sdb1", "usb_sdb1");

        let mount_point = fx.manager.mount(&id).await.unwrap();
        fx.manager.shutdown_cleanup().await;

        assert!(fx.journal.calls().contains(&Call::Umount(mount_point)));
        assert_eq!(fx.manager.mounted_count(), 0);
    }
}
