// SPDX-License-Identifier: GPL-3.0-only

//! Supervision of the single kiosk viewer process.
//!
//! At most one viewer is tracked at a time. Launching a new one always
//! clears the previous instance first, including strays left by earlier
//! service runs, via the broad pattern kill in [`crate::process`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{KioskError, Result};
use crate::process;

/// Default flag set handed to the viewer ahead of the target URL.
pub const DEFAULT_VIEWER_ARGS: &[&str] = &[
    "--kiosk",
    "--no-sandbox",
    "--disable-web-security",
    "--disable-features=TranslateUI",
    "--disable-ipc-flooding-protection",
    "--start-fullscreen",
];

/// Binaries tried in order when no viewer command is configured.
pub const VIEWER_CANDIDATES: &[&str] = &["chromium", "chromium-browser"];

/// How the viewer is started and found again.
#[derive(Debug, Clone)]
pub struct ViewerCommand {
    /// Explicit binary; when `None` the candidates are resolved via
    /// `which` at launch time.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    /// X display exported as `DISPLAY` to the spawned process.
    pub display: String,
    /// Substring matched against process command lines for broad kills.
    pub pattern: String,
}

impl Default for ViewerCommand {
    fn default() -> Self {
        Self {
            program: None,
            args: DEFAULT_VIEWER_ARGS.iter().map(|s| s.to_string()).collect(),
            display: ":0".to_string(),
            pattern: "chromium".to_string(),
        }
    }
}

/// A spawned viewer. The child handle is present for real launches and
/// absent for fakes injected in tests.
#[derive(Debug)]
pub struct ViewerInstance {
    pid: Option<u32>,
    child: Option<Child>,
}

impl ViewerInstance {
    pub fn from_child(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }

    /// Handle without a real process behind it.
    pub fn detached(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Starts and broadly terminates viewer processes.
#[async_trait]
pub trait ViewerLauncher: Send + Sync {
    /// Spawns the viewer pointed at `target`, detached from the caller.
    async fn spawn_viewer(&self, target: &Path) -> Result<ViewerInstance>;

    /// Best-effort kill of every process matching the viewer pattern,
    /// tracked by this service or not. Returns how many were signalled.
    async fn terminate_matching(&self) -> usize;
}

/// Launches a Chromium-family browser in kiosk mode on the configured
/// display, with its output discarded.
pub struct KioskViewer {
    command: ViewerCommand,
}

impl KioskViewer {
    pub fn new(command: ViewerCommand) -> Self {
        Self { command }
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.command.program {
            return Ok(program.clone());
        }
        for candidate in VIEWER_CANDIDATES {
            if let Ok(path) = which::which(candidate) {
                return Ok(path);
            }
        }
        Err(KioskError::ViewerNotFound {
            tried: VIEWER_CANDIDATES.join(", "),
        })
    }
}

#[async_trait]
impl ViewerLauncher for KioskViewer {
    async fn spawn_viewer(&self, target: &Path) -> Result<ViewerInstance> {
        let program = self.resolve_program()?;
        let url = format!("file://{}", target.display());

        let child = Command::new(&program)
            .args(&self.command.args)
            .arg(&url)
            .env("DISPLAY", &self.command.display)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(KioskError::ViewerSpawn)?;

        info!(
            program = %program.display(),
            url = %url,
            pid = ?child.id(),
            "viewer started"
        );
        Ok(ViewerInstance::from_child(child))
    }

    async fn terminate_matching(&self) -> usize {
        match process::terminate_matching(&self.command.pattern).await {
            Ok(count) => count,
            Err(e) => {
                warn!("viewer process sweep failed: {e}");
                0
            }
        }
    }
}

/// Tunables for the presentation supervisor.
#[derive(Debug, Clone)]
pub struct PresenterConfig {
    /// Filename whose presence at a mount root triggers presentation.
    pub marker_file: String,
    /// Wait between clearing prior viewers and spawning the next one.
    pub launch_settle: Duration,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            marker_file: "index.html".to_string(),
            launch_settle: Duration::from_secs(1),
        }
    }
}

/// Keeps at most one viewer alive and pointed at the current medium.
///
/// Clones share the tracked handle. Every launch/dismiss sequence runs
/// under one async lock, so a detached launch and a concurrent
/// dismissal serialize instead of racing over the handle.
#[derive(Clone)]
pub struct Presenter {
    config: PresenterConfig,
    launcher: Arc<dyn ViewerLauncher>,
    tracked: Arc<Mutex<Option<ViewerInstance>>>,
}

impl Presenter {
    pub fn new(config: PresenterConfig, launcher: Arc<dyn ViewerLauncher>) -> Self {
        Self {
            config,
            launcher,
            tracked: Arc::new(Mutex::new(None)),
        }
    }

    /// Path the marker must be at for `root` to be presented.
    pub fn marker_path(&self, root: &Path) -> PathBuf {
        root.join(&self.config.marker_file)
    }

    /// Presents the medium mounted at `root` if it carries the marker.
    ///
    /// Returns `Ok(false)` without side effects when the marker is
    /// missing. Otherwise any prior viewer is terminated, and after a
    /// settle wait the viewer is spawned against the marker and becomes
    /// the tracked instance.
    pub async fn present(&self, root: &Path) -> Result<bool> {
        let marker = self.marker_path(root);
        if !marker.exists() {
            info!(
                root = %root.display(),
                "no {} on device, leaving display as is",
                self.config.marker_file
            );
            return Ok(false);
        }
        info!(marker = %marker.display(), "found presentation marker");

        let mut tracked = self.tracked.lock().await;
        self.clear_viewer(&mut tracked).await;
        tokio::time::sleep(self.config.launch_settle).await;

        let instance = self.launcher.spawn_viewer(&marker).await?;
        debug!(pid = ?instance.pid(), "tracking new viewer instance");
        *tracked = Some(instance);
        Ok(true)
    }

    /// Tears down the tracked viewer and any pattern-matched strays.
    /// Safe to call with nothing running.
    pub async fn dismiss(&self) {
        let mut tracked = self.tracked.lock().await;
        self.clear_viewer(&mut tracked).await;
    }

    /// True while a launch is tracked.
    pub async fn has_tracked_viewer(&self) -> bool {
        self.tracked.lock().await.is_some()
    }

    async fn clear_viewer(&self, tracked: &mut Option<ViewerInstance>) {
        if let Some(mut instance) = tracked.take()
            && let Some(child) = instance.child.as_mut()
            && let Err(e) = child.kill().await
        {
            debug!("tracked viewer already gone: {e}");
        }
        let swept = self.launcher.terminate_matching().await;
        if swept > 0 {
            info!("terminated {swept} viewer process(es)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingLauncher {
        launches: StdMutex<Vec<PathBuf>>,
        sweeps: AtomicUsize,
        fail_spawn: bool,
    }

    impl RecordingLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                launches: StdMutex::new(Vec::new()),
                sweeps: AtomicUsize::new(0),
                fail_spawn: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                launches: StdMutex::new(Vec::new()),
                sweeps: AtomicUsize::new(0),
                fail_spawn: true,
            })
        }

        fn launches(&self) -> Vec<PathBuf> {
            self.launches.lock().unwrap().clone()
        }

        fn sweeps(&self) -> usize {
            self.sweeps.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ViewerLauncher for RecordingLauncher {
        async fn spawn_viewer(&self, target: &Path) -> Result<ViewerInstance> {
            if self.fail_spawn {
                return Err(KioskError::ViewerSpawn(std::io::Error::other(
                    "no display",
                )));
            }
            self.launches.lock().unwrap().push(target.to_path_buf());
            Ok(ViewerInstance::detached(4242))
        }

        async fn terminate_matching(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn quick_presenter(launcher: Arc<RecordingLauncher>) -> Presenter {
        Presenter::new(
            PresenterConfig {
                marker_file: "index.html".to_string(),
                launch_settle: Duration::from_millis(1),
            },
            launcher,
        )
    }

    #[tokio::test]
    async fn absent_marker_is_a_no_op() {
        let launcher = RecordingLauncher::new();
        let presenter = quick_presenter(launcher.clone());
        let root = tempfile::tempdir().unwrap();

        let launched = presenter.present(root.path()).await.unwrap();

        assert!(!launched);
        assert!(launcher.launches().is_empty());
        assert_eq!(launcher.sweeps(), 0);
        assert!(!presenter.has_tracked_viewer().await);
    }

    #[tokio::test]
    async fn marker_launches_viewer_against_the_marker_path() {
        let launcher = RecordingLauncher::new();
        let presenter = quick_presenter(launcher.clone());
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("index.html");
        std::fs::write(&marker, "<html></html>").unwrap();

        let launched = presenter.present(root.path()).await.unwrap();

        assert!(launched);
        assert_eq!(launcher.launches(), vec![marker]);
        assert!(presenter.has_tracked_viewer().await);
    }

    #[tokio::test]
    async fn present_clears_previous_viewers_before_launching() {
        let launcher = RecordingLauncher::new();
        let presenter = quick_presenter(launcher.clone());
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("index.html"), "x").unwrap();

        presenter.present(root.path()).await.unwrap();
        presenter.present(root.path()).await.unwrap();

        assert_eq!(launcher.launches().len(), 2);
        // one sweep per launch, each ahead of the spawn
        assert_eq!(launcher.sweeps(), 2);
        assert!(presenter.has_tracked_viewer().await);
    }

    #[tokio::test]
    async fn dismiss_is_idempotent() {
        let launcher = RecordingLauncher::new();
        let presenter = quick_presenter(launcher.clone());

        presenter.dismiss().await;
        presenter.dismiss().await;

        assert_eq!(launcher.sweeps(), 2);
        assert!(!presenter.has_tracked_viewer().await);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_nothing_tracked() {
        let launcher = RecordingLauncher::failing();
        let presenter = quick_presenter(launcher.clone());
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("index.html"), "x").unwrap();

        let result = presenter.present(root.path()).await;

        assert!(matches!(result, Err(KioskError::ViewerSpawn(_))));
        assert!(!presenter.has_tracked_viewer().await);
    }

    #[test]
    fn default_viewer_command_is_the_kiosk_flag_set() {
        let command = ViewerCommand::default();
        assert!(command.args.iter().any(|a| a == "--kiosk"));
        assert!(command.args.iter().any(|a| a == "--start-fullscreen"));
        assert_eq!(command.display, ":0");
        assert_eq!(command.pattern, "chromium");
        assert!(command.program.is_none());
    }
}
