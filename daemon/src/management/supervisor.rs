use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::management::backup::BackupManager;
use crate::management::classifier::TPS_COMMAND;
use crate::management::comm::{ProcessStartInfo, ServerProcess};
use crate::management::error::{BackupError, SupervisorError};
use crate::management::install::PackageSource;
use crate::management::minecraft::prepare_launch;
use crate::management::output::OutputReceiver;
use crate::management::state::{Shared, SupervisorState};
use crate::management::stats::{parse_heap_size, StatsSampler};
use mcsv_protocol::management::backup::BackupInfo;
use mcsv_protocol::management::server::{
    EventKind, StatsSnapshot, SupervisorConfig, SupervisorEvent, SupervisorStatus,
};
use mcsv_protocol::utils::format_bytes;

use SupervisorStatus::*;

const SAVE_COMMAND: &str = "save-all";
const STOP_COMMAND: &str = "stop";

const SAVE_SETTLE_DELAY: Duration = Duration::from_secs(2);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_DELAY: Duration = Duration::from_secs(2);
const CRASH_RESTART_DELAY: Duration = Duration::from_secs(5);
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const METRICS_WARMUP: Duration = Duration::from_secs(15);
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle delays; the fixed values above unless a test shortens them.
#[derive(Debug, Clone, Copy)]
struct Timings {
    save_settle: Duration,
    stop_timeout: Duration,
    kill_timeout: Duration,
    restart_delay: Duration,
    crash_restart_delay: Duration,
    metrics_warmup: Duration,
    metrics_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            save_settle: SAVE_SETTLE_DELAY,
            stop_timeout: STOP_TIMEOUT,
            kill_timeout: KILL_TIMEOUT,
            restart_delay: RESTART_DELAY,
            crash_restart_delay: CRASH_RESTART_DELAY,
            metrics_warmup: METRICS_WARMUP,
            metrics_interval: METRICS_INTERVAL,
        }
    }
}

/// One spawned child and the token that scopes its loops.
#[derive(Clone)]
struct ServerRun {
    id: u64,
    process: ServerProcess,
    cancel: CancellationToken,
}

struct Inner {
    config: SupervisorConfig,
    timings: Timings,
    mods_root: PathBuf,
    shared: Shared,
    package_source: Option<Arc<dyn PackageSource>>,
    backups: BackupManager,
    backup_lock: Mutex<()>,
    run: Mutex<Option<ServerRun>>,
    event_rx: StdMutex<Option<mpsc::Receiver<SupervisorEvent>>>,
    shutdown: CancellationToken,
    lifecycle_busy: AtomicBool,
    /// Bumped by every manual start/stop/restart; a pending auto-restart
    /// only fires if it has not moved.
    epoch: AtomicU64,
    next_run_id: AtomicU64,
}

/// Owns one Minecraft server process: its lifecycle, console, resource
/// figures and world backups. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct LifecycleGuard<'a>(&'a AtomicBool);

impl Drop for LifecycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_package_source(config, None)
    }

    pub fn with_package_source(
        config: SupervisorConfig,
        package_source: Option<Arc<dyn PackageSource>>,
    ) -> Self {
        Self::with_timings(config, package_source, Timings::default())
    }

    fn with_timings(
        config: SupervisorConfig,
        package_source: Option<Arc<dyn PackageSource>>,
        timings: Timings,
    ) -> Self {
        let (shared, event_rx) = Shared::new(parse_heap_size(&config.ram_max));
        let backups = BackupManager::new(
            &config.server_dir,
            &config.backup.dir,
            config.backup.max_backups,
        );
        let mods_root = config
            .local_mods_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        Self {
            inner: Arc::new(Inner {
                config,
                timings,
                mods_root,
                shared,
                package_source,
                backups,
                backup_lock: Mutex::new(()),
                run: Mutex::new(None),
                event_rx: StdMutex::new(Some(event_rx)),
                shutdown: CancellationToken::new(),
                lifecycle_busy: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub async fn status(&self) -> SupervisorStatus {
        self.inner.shared.status().await
    }

    pub async fn get_stats(&self) -> StatsSnapshot {
        self.inner.shared.snapshot().await
    }

    /// Raw console lines from both output streams. A subscriber that falls
    /// behind skips the oldest lines and keeps the newest 1000.
    pub fn subscribe_output(&self) -> OutputReceiver {
        self.inner.shared.subscribe_output()
    }

    /// The event stream can be taken once; later calls return `None`.
    pub fn take_event_stream(&self) -> Option<mpsc::Receiver<SupervisorEvent>> {
        self.inner
            .event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawns the server. Returns once the process is running, not once it
    /// reports ready. Does nothing if a server is already up.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let _guard = self.begin_lifecycle()?;
        self.bump_epoch();
        self.start_inner().await
    }

    /// Saves and stops the server, killing it if it does not exit within
    /// the grace period. A no-op unless the server is starting, running or
    /// still winding down after a console `stop`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let _guard = self.begin_lifecycle()?;
        self.bump_epoch();

        let shared = &self.inner.shared;
        if shared
            .transition_from(&[Running, Starting, Stopping], Stopping)
            .await
            .is_none()
        {
            return Ok(());
        }
        self.shutdown_process().await;
        shared
            .update(|state| {
                state.set_status(Stopped);
                state.players.clear();
                state.player_count = 0;
            })
            .await;
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), SupervisorError> {
        let _guard = self.begin_lifecycle()?;
        self.bump_epoch();
        self.restart_inner().await
    }

    /// Writes one line to the server console.
    pub async fn send_command(&self, command: &str) -> Result<(), SupervisorError> {
        let run = self.current_run().await.ok_or(SupervisorError::NotRunning)?;
        if command.trim() == STOP_COMMAND
            && self
                .inner
                .shared
                .transition_from(&[Running, Starting], Stopping)
                .await
                .is_some()
        {
            // the exit that follows is expected, but it has to happen
            tokio::spawn(self.clone().enforce_stop(run.clone()));
        }
        self.dispatch(&run, command).await
    }

    /// Archives the worlds now. Saving is paused around the archive while
    /// the server is running.
    pub async fn create_backup(&self) -> Result<BackupInfo, SupervisorError> {
        let run = match self.status().await {
            Running => self.current_run().await,
            _ => None,
        };
        self.perform_backup(run.as_ref()).await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, SupervisorError> {
        let manager = self.inner.backups.clone();
        blocking(move || manager.list_backups()).await
    }

    pub async fn backups_total_size(&self) -> Result<u64, SupervisorError> {
        let manager = self.inner.backups.clone();
        blocking(move || manager.total_size()).await
    }

    /// Extracts an archive over the server directory. Only allowed while
    /// no server process is attached.
    pub async fn restore_backup<P: AsRef<Path>>(&self, path: P) -> Result<(), SupervisorError> {
        let _guard = self.begin_lifecycle()?;
        let status = self.status().await;
        if !matches!(status, Stopped | Crashed) {
            return Err(SupervisorError::RestoreWhileRunning(status));
        }

        let _serial = self.inner.backup_lock.lock().await;
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let manager = self.inner.backups.clone();
        blocking(move || manager.restore_backup(&path)).await?;

        self.inner
            .shared
            .emit(EventKind::Backup, format!("Restored backup {}", name))
            .await;
        Ok(())
    }

    /// Stops the server if needed and cancels every background loop.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop().await {
            warn!("stop during shutdown failed: {}", err);
        }
        self.inner.shutdown.cancel();
        if let Some(run) = self.current_run().await {
            run.process.kill();
        }
    }
}

impl Supervisor {
    fn begin_lifecycle(&self) -> Result<LifecycleGuard<'_>, SupervisorError> {
        self.inner
            .lifecycle_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SupervisorError::Busy)?;
        Ok(LifecycleGuard(&self.inner.lifecycle_busy))
    }

    fn bump_epoch(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
    }

    async fn current_run(&self) -> Option<ServerRun> {
        self.inner.run.lock().await.clone()
    }

    /// Clears the run slot if it still holds `run_id`. Returns whether it
    /// did.
    async fn release_run(&self, run_id: u64) -> bool {
        let mut slot = self.inner.run.lock().await;
        if !slot.as_ref().is_some_and(|run| run.id == run_id) {
            return false;
        }
        if let Some(run) = slot.take() {
            run.cancel.cancel();
        }
        true
    }

    async fn start_inner(&self) -> Result<(), SupervisorError> {
        let shared = &self.inner.shared;
        match shared.status().await {
            Stopped | Restarting => {}
            Crashed => {
                shared.set_status(Restarting).await;
            }
            other => {
                debug!("start ignored, server is {}", other);
                return Ok(());
            }
        }
        shared.set_status(Starting).await;

        if let Err(err) = self.launch().await {
            shared.set_status(Stopped).await;
            shared
                .emit(EventKind::Error, format!("Failed to start server: {}", err))
                .await;
            return Err(err);
        }
        Ok(())
    }

    async fn launch(&self) -> Result<(), SupervisorError> {
        let config = &self.inner.config;
        let shared = &self.inner.shared;
        tokio::fs::create_dir_all(&config.server_dir).await?;

        if config.package.is_configured() {
            self.install_package().await?;
        }

        let prepared = {
            let config = config.clone();
            let mods_root = self.inner.mods_root.clone();
            tokio::task::spawn_blocking(move || prepare_launch(&config, &mods_root))
                .await
                .map_err(|err| SupervisorError::Io(io::Error::other(err)))??
        };
        for (kind, message) in prepared.notices {
            shared.emit(kind, message).await;
        }

        info!(
            "launching {:?}: {} {}",
            prepared.target,
            config.java_path,
            prepared.args.join(" ")
        );
        let (process, output) = ServerProcess::spawn(ProcessStartInfo {
            target: config.java_path.clone(),
            args: prepared.args,
            working_dir: config.server_dir.clone(),
        })
        .map_err(SupervisorError::Spawn)?;

        let run = ServerRun {
            id: self.inner.next_run_id.fetch_add(1, Ordering::SeqCst),
            process,
            cancel: self.inner.shutdown.child_token(),
        };
        shared.update(SupervisorState::begin_run).await;
        *self.inner.run.lock().await = Some(run.clone());

        tokio::spawn(self.clone().pump_output(output.stdout));
        tokio::spawn(self.clone().pump_output(output.stderr));
        tokio::spawn(self.clone().sample_resources(run.clone()));
        tokio::spawn(self.clone().poll_metrics(run.clone()));
        if config.backup.enabled {
            tokio::spawn(self.clone().schedule_backups(run.clone()));
        }
        let pid = run.process.pid();
        tokio::spawn(self.clone().monitor_exit(run));

        shared
            .emit(EventKind::Info, format!("Server process started (pid {})", pid))
            .await;
        Ok(())
    }

    async fn install_package(&self) -> Result<(), SupervisorError> {
        let source = self
            .inner
            .package_source
            .clone()
            .ok_or(SupervisorError::PackageSourceMissing)?;
        let package = &self.inner.config.package;
        let server_dir = &self.inner.config.server_dir;
        let shared = &self.inner.shared;

        shared.set_status(Downloading).await;
        shared
            .emit(EventKind::Info, format!("Downloading modpack: {}", package.id))
            .await;
        let archive = source
            .install(&package.id, &package.version, server_dir)
            .await
            .map_err(SupervisorError::Install)?;

        shared.set_status(Installing).await;
        shared.emit(EventKind::Info, "Installing modpack...").await;
        source
            .unpack(&archive, server_dir)
            .await
            .map_err(SupervisorError::Install)?;

        shared.set_status(Starting).await;
        shared
            .emit(EventKind::Info, "Modpack installed successfully")
            .await;
        Ok(())
    }

    async fn restart_inner(&self) -> Result<(), SupervisorError> {
        let shared = &self.inner.shared;
        let previous = shared
            .update(|state| {
                let previous = state.status;
                match previous {
                    Running | Starting | Crashed => {
                        state.set_status(Restarting);
                    }
                    Stopped => {}
                    other => return Err(SupervisorError::InvalidState(other)),
                }
                state.restarts += 1;
                Ok(previous)
            })
            .await?;

        shared.emit(EventKind::Restart, "Restarting server...").await;
        if matches!(previous, Running | Starting) {
            self.shutdown_process().await;
            sleep(self.inner.timings.restart_delay).await;
        }
        self.start_inner().await
    }

    /// Boxed to break the start -> exit monitor -> restart -> start cycle.
    fn auto_restart(&self) -> BoxFuture<'static, Result<(), SupervisorError>> {
        let this = self.clone();
        async move {
            let _guard = this.begin_lifecycle()?;
            this.restart_inner().await
        }
        .boxed()
    }

    /// Graceful stop sequence for the current child. Leaves the status
    /// alone; callers decide what it becomes.
    async fn shutdown_process(&self) {
        let Some(run) = self.current_run().await else {
            return;
        };
        let shared = &self.inner.shared;
        let timings = self.inner.timings;

        shared.emit(EventKind::Info, "Stopping server...").await;
        if let Err(err) = self.dispatch(&run, SAVE_COMMAND).await {
            debug!("save before stop failed: {}", err);
        }
        sleep(timings.save_settle).await;

        if let Err(err) = self.dispatch(&run, STOP_COMMAND).await {
            shared
                .emit(EventKind::Warning, format!("Could not send stop command: {}", err))
                .await;
            run.process.kill();
        }

        match timeout(timings.stop_timeout, run.process.wait()).await {
            Ok(exit) => {
                shared
                    .emit(EventKind::Info, format!("Server stopped ({})", exit))
                    .await
            }
            Err(_) => self.force_kill(&run).await,
        }
        self.release_run(run.id).await;
    }

    /// Bounds the wait after a console `stop`; the exit monitor takes the
    /// status on to Stopped.
    async fn enforce_stop(self, run: ServerRun) {
        if timeout(self.inner.timings.stop_timeout, run.process.wait())
            .await
            .is_err()
        {
            self.force_kill(&run).await;
        }
    }

    async fn force_kill(&self, run: &ServerRun) {
        self.inner
            .shared
            .emit(
                EventKind::Warning,
                "Server did not stop in time, killing process",
            )
            .await;
        run.process.kill();
        if timeout(self.inner.timings.kill_timeout, run.process.wait())
            .await
            .is_err()
        {
            warn!("process {} still alive after kill", run.process.pid());
        }
    }

    async fn dispatch(&self, run: &ServerRun, command: &str) -> Result<(), SupervisorError> {
        run.process
            .send(command)
            .await
            .map_err(SupervisorError::Send)?;
        if command != TPS_COMMAND {
            self.inner
                .shared
                .emit(EventKind::Command, format!("Executed: {}", command))
                .await;
        }
        Ok(())
    }

    async fn perform_backup(&self, run: Option<&ServerRun>) -> Result<BackupInfo, SupervisorError> {
        let _serial = self.inner.backup_lock.lock().await;
        let shared = &self.inner.shared;
        shared
            .emit(EventKind::Backup, "Starting world backup...")
            .await;

        if let Some(run) = run {
            for command in ["save-off", "save-all flush"] {
                if let Err(err) = self.dispatch(run, command).await {
                    debug!("{} failed: {}", command, err);
                }
            }
            sleep(self.inner.timings.save_settle).await;
        }

        let manager = self.inner.backups.clone();
        let result = blocking(move || manager.create_backup()).await;

        if let Some(run) = run {
            if let Err(err) = self.dispatch(run, "save-on").await {
                warn!("could not re-enable world saving: {}", err);
            }
        }

        match &result {
            Ok(info) => {
                shared
                    .emit(
                        EventKind::Backup,
                        format!(
                            "Backup completed: {} ({})",
                            info.name,
                            format_bytes(info.size)
                        ),
                    )
                    .await
            }
            Err(err) => {
                shared
                    .emit(EventKind::Error, format!("Backup failed: {}", err))
                    .await
            }
        }
        result
    }
}

// background loops, one set per run
impl Supervisor {
    async fn pump_output<R>(self, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']).to_owned();
                    self.inner.shared.handle_line(line).await;
                }
                Err(err) => {
                    debug!("output stream closed: {}", err);
                    break;
                }
            }
        }
    }

    async fn sample_resources(self, run: ServerRun) {
        let mut sampler = StatsSampler::new(run.process.pid());
        let mut ticker = interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                _ = run.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = sampler.sample();
                    self.inner.shared.update(|state| state.apply_sample(&sample)).await;
                }
            }
        }
    }

    async fn poll_metrics(self, run: ServerRun) {
        let timings = self.inner.timings;
        select! {
            _ = run.cancel.cancelled() => return,
            _ = sleep(timings.metrics_warmup) => {}
        }
        let mut ticker = interval(timings.metrics_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            select! {
                _ = run.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.status().await != Running {
                        continue;
                    }
                    if let Err(err) = self.dispatch(&run, TPS_COMMAND).await {
                        debug!("metrics request failed: {}", err);
                    }
                }
            }
        }
    }

    async fn schedule_backups(self, run: ServerRun) {
        let minutes = self.inner.config.backup.interval_minutes.max(1);
        let period = Duration::from_secs(minutes * 60);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = run.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.status().await != Running {
                        continue;
                    }
                    if let Err(err) = self.perform_backup(Some(&run)).await {
                        debug!("scheduled backup failed: {}", err);
                    }
                }
            }
        }
    }

    async fn monitor_exit(self, run: ServerRun) {
        let exit = run.process.wait().await;
        run.cancel.cancel();
        if !self.release_run(run.id).await {
            // stop or restart took this run down and owns the status
            debug!("server exited ({})", exit);
            return;
        }

        let previous = self
            .inner
            .shared
            .update(|state| {
                let previous = state.status;
                match previous {
                    Stopping => {
                        state.set_status(Stopped);
                    }
                    Running | Starting => {
                        state.set_status(Crashed);
                    }
                    _ => {}
                }
                state.players.clear();
                state.player_count = 0;
                previous
            })
            .await;

        match previous {
            Running | Starting => {}
            Stopping => {
                info!("server exited ({})", exit);
                return;
            }
            other => {
                debug!("server exited while {} ({})", other, exit);
                return;
            }
        }

        let shared = &self.inner.shared;
        shared
            .emit(EventKind::Error, format!("Server crashed ({})", exit))
            .await;
        if !self.inner.config.auto_restart {
            return;
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let delay = self.inner.timings.crash_restart_delay;
        shared
            .emit(
                EventKind::Restart,
                format!("Auto-restarting in {} seconds...", delay.as_secs()),
            )
            .await;
        select! {
            _ = self.inner.shutdown.cancelled() => return,
            _ = sleep(delay) => {}
        }

        if self.inner.epoch.load(Ordering::SeqCst) != epoch || self.status().await != Crashed {
            info!("auto-restart cancelled by a manual lifecycle call");
            return;
        }
        if let Err(err) = self.auto_restart().await {
            warn!("auto-restart failed: {}", err);
        }
    }
}

async fn blocking<T, F>(job: F) -> Result<T, SupervisorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackupError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| SupervisorError::Io(io::Error::other(err)))?
        .map_err(SupervisorError::from)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::management::minecraft::EULA_FILE;
    use async_trait::async_trait;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const FAKE_SERVER: &str = r#"#!/bin/sh
echo "[00:00:00] [Server thread/INFO]: Starting minecraft server version 1.20.4"
echo '[00:00:01] [Server thread/INFO]: Done (0.123s)! For help, type "help"'
while IFS= read -r line; do
  case "$line" in
    stop) echo "[00:00:02] [Server thread/INFO]: Stopping the server"; exit 0 ;;
    crash) echo "[00:00:02] [Server thread/ERROR]: Encountered an unexpected exception"; exit 1 ;;
    join) echo "[00:00:02] [Server thread/INFO]: Steve joined the game" ;;
    "forge tps") echo "[00:00:03] [Server thread/INFO]: Overall : Mean TPS: 19.87" ;;
  esac
done
"#;

    const DEAF_SERVER: &str = r#"#!/bin/sh
echo '[00:00:01] [Server thread/INFO]: Done (0.123s)! For help, type "help"'
while IFS= read -r line; do :; done
"#;

    fn quick_timings() -> Timings {
        Timings {
            save_settle: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(1),
            kill_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_millis(100),
            crash_restart_delay: Duration::from_millis(500),
            metrics_warmup: Duration::from_secs(1),
            metrics_interval: Duration::from_millis(200),
        }
    }

    fn fixture(auto_restart: bool) -> (TempDir, SupervisorConfig) {
        fixture_with(FAKE_SERVER, auto_restart)
    }

    fn fixture_with(script: &str, auto_restart: bool) -> (TempDir, SupervisorConfig) {
        let tmp = tempfile::tempdir().unwrap();
        let server_dir = tmp.path().join("server");
        fs::create_dir_all(&server_dir).unwrap();
        fs::write(server_dir.join("server.jar"), "").unwrap();

        let java = tmp.path().join("fake-java");
        fs::write(&java, script).unwrap();
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();

        let config = SupervisorConfig {
            server_dir,
            java_path: java.to_string_lossy().into_owned(),
            auto_restart,
            local_mods_dir: Some(tmp.path().to_path_buf()),
            backup: mcsv_protocol::management::server::BackupConfig {
                dir: tmp.path().join("backups"),
                ..Default::default()
            },
            ..Default::default()
        };
        (tmp, config)
    }

    async fn wait_for(supervisor: &Supervisor, status: SupervisorStatus, secs: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(secs);
        while Instant::now() < deadline {
            if supervisor.status().await == status {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn has_event(stats: &StatsSnapshot, kind: EventKind, text: &str) -> bool {
        stats
            .recent_events
            .iter()
            .any(|e| e.kind == kind && e.message.contains(text))
    }

    #[tokio::test]
    async fn start_play_and_stop() {
        let (_tmp, config) = fixture(false);
        let supervisor = Supervisor::new(config.clone());
        let mut output = supervisor.subscribe_output();

        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);
        assert!(config.server_dir.join(EULA_FILE).exists());
        assert!(output.recv().await.unwrap().contains("Starting minecraft server"));

        supervisor.send_command("join").await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.get_stats().await.player_count != 1 && Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }

        let stats = supervisor.get_stats().await;
        assert_eq!(stats.player_count, 1);
        assert_eq!(stats.players[0].name, "Steve");
        assert!(stats.start_time.is_some());
        assert!(has_event(&stats, EventKind::Info, "Server started successfully!"));
        assert!(has_event(&stats, EventKind::Command, "Executed: join"));

        supervisor.stop().await.unwrap();
        let stats = supervisor.get_stats().await;
        assert_eq!(stats.status, Stopped);
        assert_eq!(stats.uptime, Duration::ZERO);
        assert_eq!(stats.restarts, 0);
        assert!(!has_event(&stats, EventKind::Error, "crashed"));
        assert!(matches!(
            supervisor.send_command("list").await,
            Err(SupervisorError::NotRunning)
        ));

        // already stopped
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn crash_without_auto_restart() {
        let (_tmp, config) = fixture(false);
        let supervisor = Supervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("crash").await.unwrap();
        assert!(wait_for(&supervisor, Crashed, 10).await);
        let stats = supervisor.get_stats().await;
        assert!(has_event(&stats, EventKind::Error, "Server crashed"));
        assert!(!has_event(&stats, EventKind::Restart, "Auto-restarting"));

        // stop from crashed is a no-op
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.status().await, Crashed);
    }

    #[tokio::test]
    async fn auto_restart_after_crash() {
        let (_tmp, config) = fixture(true);
        let supervisor = Supervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("crash").await.unwrap();
        assert!(wait_for(&supervisor, Crashed, 10).await);
        assert!(wait_for(&supervisor, Running, 20).await);

        let stats = supervisor.get_stats().await;
        assert_eq!(stats.restarts, 1);
        assert!(has_event(&stats, EventKind::Restart, "Auto-restarting"));
        supervisor.shutdown().await;
        assert_eq!(supervisor.status().await, Stopped);
    }

    #[tokio::test]
    async fn manual_stop_cancels_pending_auto_restart() {
        let (_tmp, config) = fixture(true);
        let supervisor = Supervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("crash").await.unwrap();
        assert!(wait_for(&supervisor, Crashed, 10).await);
        supervisor.stop().await.unwrap();

        sleep(CRASH_RESTART_DELAY + Duration::from_secs(1)).await;
        let stats = supervisor.get_stats().await;
        assert_eq!(stats.status, Crashed);
        assert_eq!(stats.restarts, 0);
    }

    #[tokio::test]
    async fn operator_stop_is_not_a_crash() {
        let (_tmp, config) = fixture(true);
        let supervisor = Supervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("stop").await.unwrap();
        assert!(wait_for(&supervisor, Stopped, 10).await);
        let stats = supervisor.get_stats().await;
        assert!(!has_event(&stats, EventKind::Error, "Server crashed"));
        assert_eq!(stats.restarts, 0);
    }

    #[tokio::test]
    async fn ignored_console_stop_is_forced() {
        let (_tmp, config) = fixture_with(DEAF_SERVER, true);
        let supervisor = Supervisor::with_timings(config, None, quick_timings());
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("stop").await.unwrap();
        assert_eq!(supervisor.status().await, Stopping);
        assert!(wait_for(&supervisor, Stopped, 10).await);

        let stats = supervisor.get_stats().await;
        assert!(has_event(&stats, EventKind::Warning, "did not stop in time"));
        assert!(!has_event(&stats, EventKind::Error, "Server crashed"));
        assert!(matches!(
            supervisor.send_command("list").await,
            Err(SupervisorError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn stop_finishes_an_ignored_console_stop() {
        let (_tmp, config) = fixture_with(DEAF_SERVER, false);
        let mut timings = quick_timings();
        timings.stop_timeout = Duration::from_millis(500);
        let supervisor = Supervisor::with_timings(config, None, timings);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.send_command("stop").await.unwrap();
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.status().await, Stopped);
        assert!(supervisor.current_run().await.is_none());

        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_are_polled_after_warmup() {
        let (_tmp, config) = fixture(false);
        let timings = quick_timings();
        let supervisor = Supervisor::with_timings(config, None, timings);
        let started = std::time::Instant::now();
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        let deadline = Instant::now() + Duration::from_secs(10);
        while supervisor.get_stats().await.tps != 19.87 && Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
        assert!(started.elapsed() >= timings.metrics_warmup);

        let stats = supervisor.get_stats().await;
        assert_eq!(stats.tps, 19.87);
        assert!(!has_event(&stats, EventKind::Command, TPS_COMMAND));
        assert!(!stats.recent_events.iter().any(|e| e.message.contains("Mean TPS")));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn restart_running_server() {
        let (_tmp, config) = fixture(false);
        let supervisor = Supervisor::new(config);
        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);

        supervisor.restart().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);
        let stats = supervisor.get_stats().await;
        assert_eq!(stats.restarts, 1);
        assert!(!has_event(&stats, EventKind::Error, "Server crashed"));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_from_stopped_is_a_start() {
        let (_tmp, config) = fixture(false);
        let supervisor = Supervisor::new(config);
        supervisor.restart().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);
        assert_eq!(supervisor.get_stats().await.restarts, 1);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_launch_target() {
        let (_tmp, config) = fixture(false);
        fs::remove_file(config.server_dir.join("server.jar")).unwrap();
        let supervisor = Supervisor::new(config);

        assert!(matches!(
            supervisor.start().await,
            Err(SupervisorError::LaunchTargetNotFound(_))
        ));
        let stats = supervisor.get_stats().await;
        assert_eq!(stats.status, Stopped);
        assert!(has_event(&stats, EventKind::Error, "no server JAR found"));
    }

    struct SlowFailingSource;

    #[async_trait]
    impl PackageSource for SlowFailingSource {
        async fn install(&self, _id: &str, _version: &str, _dest: &Path) -> anyhow::Result<PathBuf> {
            sleep(Duration::from_millis(500)).await;
            anyhow::bail!("catalog unreachable")
        }
    }

    #[tokio::test]
    async fn overlapping_lifecycle_calls_are_busy() {
        let (_tmp, mut config) = fixture(false);
        config.package.id = "12345".to_owned();
        let supervisor = Supervisor::with_package_source(config, Some(Arc::new(SlowFailingSource)));

        let starting = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.start().await }
        });
        assert!(wait_for(&supervisor, Downloading, 5).await);
        assert!(matches!(supervisor.stop().await, Err(SupervisorError::Busy)));
        assert!(matches!(supervisor.restart().await, Err(SupervisorError::Busy)));

        let result = starting.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Install(_))));
        let stats = supervisor.get_stats().await;
        assert_eq!(stats.status, Stopped);
        assert!(has_event(&stats, EventKind::Error, "catalog unreachable"));
    }

    #[tokio::test]
    async fn package_without_source() {
        let (_tmp, mut config) = fixture(false);
        config.package.id = "12345".to_owned();
        let supervisor = Supervisor::new(config);
        assert!(matches!(
            supervisor.start().await,
            Err(SupervisorError::PackageSourceMissing)
        ));
        assert_eq!(supervisor.status().await, Stopped);
    }

    #[tokio::test]
    async fn backups_while_stopped() {
        let (_tmp, config) = fixture(false);
        let world = config.server_dir.join("world");
        fs::create_dir_all(&world).unwrap();
        fs::write(world.join("level.dat"), "v1").unwrap();
        let supervisor = Supervisor::new(config);

        let info = supervisor.create_backup().await.unwrap();
        assert_eq!(supervisor.list_backups().await.unwrap(), vec![info.clone()]);
        assert_eq!(supervisor.backups_total_size().await.unwrap(), info.size);

        fs::write(world.join("level.dat"), "v2").unwrap();
        supervisor.restore_backup(&info.path).await.unwrap();
        assert_eq!(fs::read_to_string(world.join("level.dat")).unwrap(), "v1");

        let stats = supervisor.get_stats().await;
        assert!(has_event(&stats, EventKind::Backup, "Backup completed"));
        assert!(has_event(&stats, EventKind::Backup, "Restored backup"));
    }

    #[tokio::test]
    async fn restore_refused_while_running() {
        let (_tmp, config) = fixture(false);
        let world = config.server_dir.join("world");
        fs::create_dir_all(&world).unwrap();
        fs::write(world.join("level.dat"), "").unwrap();
        let supervisor = Supervisor::new(config);
        let info = supervisor.create_backup().await.unwrap();

        supervisor.start().await.unwrap();
        assert!(wait_for(&supervisor, Running, 10).await);
        assert!(matches!(
            supervisor.restore_backup(&info.path).await,
            Err(SupervisorError::RestoreWhileRunning(Running))
        ));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn event_stream_is_taken_once() {
        let (_tmp, config) = fixture(false);
        let supervisor = Supervisor::new(config);
        let mut events = supervisor.take_event_stream().unwrap();
        assert!(supervisor.take_event_stream().is_none());

        supervisor.create_backup().await.unwrap_err();
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Backup);
    }
}
