//! Best-effort system sleep inhibition around long-running phases.
//!
//! [`WakeLock`] is the single process-wide handle. It is created once at
//! startup with [`WakeLock::detect`], which picks a [`PowerInhibitor`]
//! for the host platform, and is then owned by the orchestrator.
//! [`WakeLock::hold`] returns a [`WakeLockGuard`] that releases the lock
//! when dropped, so an error, a panic, or a cancelled future all still
//! release it.
//!
//! Acquiring an already-held lock and releasing an unheld lock are both
//! no-ops. A backend that cannot inhibit sleep (unsupported OS, missing
//! tool, insufficient privileges) never fails the caller; it is logged
//! once and the lock simply stays unheld.

#[cfg(not(windows))]
use std::path::PathBuf;

/// Error from a platform sleep-inhibition backend.
#[derive(Debug, thiserror::Error)]
pub enum WakeLockError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },

    #[error("{0}")]
    Platform(String),
}

/// A platform mechanism that can keep the host awake.
pub trait PowerInhibitor: Send {
    fn name(&self) -> &'static str;
    fn inhibit(&mut self) -> Result<(), WakeLockError>;
    fn uninhibit(&mut self) -> Result<(), WakeLockError>;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Used when no platform mechanism is available.
pub struct NoopInhibitor;

impl PowerInhibitor for NoopInhibitor {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn inhibit(&mut self) -> Result<(), WakeLockError> {
        Ok(())
    }

    fn uninhibit(&mut self) -> Result<(), WakeLockError> {
        Ok(())
    }
}

/// Holds an inhibitor child process (`systemd-inhibit`, `caffeinate`)
/// for as long as the lock is held.
pub struct ProcessInhibitor {
    program: &'static str,
    args: Vec<String>,
    child: Option<tokio::process::Child>,
}

impl ProcessInhibitor {
    /// `systemd-inhibit` blocking sleep and idle until the child is killed.
    pub fn systemd(label: &str) -> Self {
        Self {
            program: "systemd-inhibit",
            args: vec![
                "--what=sleep:idle".into(),
                format!("--who={label}"),
                "--why=Generating and uploading a video".into(),
                "--mode=block".into(),
                "sleep".into(),
                "infinity".into(),
            ],
            child: None,
        }
    }

    /// macOS `caffeinate` preventing idle and system sleep until killed.
    pub fn caffeinate() -> Self {
        Self {
            program: "caffeinate",
            args: vec!["-i".into(), "-s".into()],
            child: None,
        }
    }
}

impl PowerInhibitor for ProcessInhibitor {
    fn name(&self) -> &'static str {
        self.program
    }

    fn inhibit(&mut self) -> Result<(), WakeLockError> {
        if self.child.is_some() {
            return Ok(());
        }
        let child = tokio::process::Command::new(self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WakeLockError::Spawn {
                program: self.program,
                source,
            })?;
        self.child = Some(child);
        Ok(())
    }

    fn uninhibit(&mut self) -> Result<(), WakeLockError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        // An inhibitor that already exited was most likely refused by the
        // session (no polkit rights); there is nothing left to undo.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(WakeLockError::Platform(format!(
                "{} exited early with {status}",
                self.program
            )));
        }
        child
            .start_kill()
            .map_err(|e| WakeLockError::Platform(format!("failed to stop {}: {e}", self.program)))
    }
}

/// Windows `SetThreadExecutionState`.
///
/// The execution state is per-thread; the worker runs on a
/// current-thread runtime so acquire and release happen on the same
/// thread.
#[cfg(windows)]
pub struct ExecutionStateInhibitor;

#[cfg(windows)]
impl PowerInhibitor for ExecutionStateInhibitor {
    fn name(&self) -> &'static str {
        "SetThreadExecutionState"
    }

    fn inhibit(&mut self) -> Result<(), WakeLockError> {
        use windows_sys::Win32::System::Power::{
            SetThreadExecutionState, ES_CONTINUOUS, ES_DISPLAY_REQUIRED, ES_SYSTEM_REQUIRED,
        };
        // SAFETY: plain FFI call with flag arguments, no pointers involved.
        let previous = unsafe {
            SetThreadExecutionState(ES_CONTINUOUS | ES_SYSTEM_REQUIRED | ES_DISPLAY_REQUIRED)
        };
        if previous == 0 {
            return Err(WakeLockError::Platform(
                "SetThreadExecutionState rejected the request".into(),
            ));
        }
        Ok(())
    }

    fn uninhibit(&mut self) -> Result<(), WakeLockError> {
        use windows_sys::Win32::System::Power::{SetThreadExecutionState, ES_CONTINUOUS};
        // SAFETY: see `inhibit`.
        unsafe { SetThreadExecutionState(ES_CONTINUOUS) };
        Ok(())
    }
}

/// Locate `program` on `PATH`.
#[cfg(not(windows))]
fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Pick the inhibitor for the current host, or `None` if there is none.
#[cfg(windows)]
fn platform_inhibitor(_label: &str) -> Option<Box<dyn PowerInhibitor>> {
    Some(Box::new(ExecutionStateInhibitor))
}

#[cfg(not(windows))]
fn platform_inhibitor(label: &str) -> Option<Box<dyn PowerInhibitor>> {
    if cfg!(target_os = "macos") && find_in_path("caffeinate").is_some() {
        return Some(Box::new(ProcessInhibitor::caffeinate()));
    }
    if cfg!(target_os = "linux")
        && std::path::Path::new("/run/systemd/system").exists()
        && find_in_path("systemd-inhibit").is_some()
    {
        return Some(Box::new(ProcessInhibitor::systemd(label)));
    }
    None
}

// ---------------------------------------------------------------------------
// WakeLock
// ---------------------------------------------------------------------------

/// Process-wide sleep-inhibition handle with boolean re-entrancy.
pub struct WakeLock {
    label: String,
    backend: Box<dyn PowerInhibitor>,
    held: bool,
    unavailable_reported: bool,
}

impl WakeLock {
    pub fn new(label: impl Into<String>, backend: Box<dyn PowerInhibitor>) -> Self {
        Self {
            label: label.into(),
            backend,
            held: false,
            unavailable_reported: false,
        }
    }

    /// Select the platform backend, falling back to a no-op lock.
    pub fn detect(label: impl Into<String>) -> Self {
        let label = label.into();
        match platform_inhibitor(&label) {
            Some(backend) => {
                tracing::info!(label = %label, backend = backend.name(), "Wake lock available");
                Self::new(label, backend)
            }
            None => {
                tracing::info!(
                    label = %label,
                    "Wake lock not supported on this host, system sleep will not be inhibited",
                );
                let mut lock = Self::new(label, Box::new(NoopInhibitor));
                lock.unavailable_reported = true;
                lock
            }
        }
    }

    /// A lock that never touches the platform.
    pub fn disabled(label: impl Into<String>) -> Self {
        Self::new(label, Box::new(NoopInhibitor))
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Prevent system sleep. Idempotent; never fails.
    pub fn acquire(&mut self) {
        if self.held {
            tracing::debug!(label = %self.label, "Wake lock already held");
            return;
        }
        match self.backend.inhibit() {
            Ok(()) => {
                self.held = true;
                tracing::info!(label = %self.label, backend = self.backend.name(), "Wake lock acquired");
            }
            Err(e) if !self.unavailable_reported => {
                self.unavailable_reported = true;
                tracing::info!(
                    label = %self.label,
                    error = %e,
                    "Wake lock unavailable, continuing without it",
                );
            }
            Err(e) => {
                tracing::debug!(label = %self.label, error = %e, "Wake lock still unavailable");
            }
        }
    }

    /// Allow system sleep again. A no-op when not held.
    pub fn release(&mut self) {
        if !self.held {
            tracing::debug!(label = %self.label, "Wake lock not held, nothing to release");
            return;
        }
        if let Err(e) = self.backend.uninhibit() {
            tracing::warn!(label = %self.label, error = %e, "Wake lock release reported an error");
        }
        self.held = false;
        tracing::info!(label = %self.label, "Wake lock released");
    }

    /// Acquire and return a guard that releases on drop.
    pub fn hold(&mut self) -> WakeLockGuard<'_> {
        self.acquire();
        WakeLockGuard { lock: self }
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scoped acquisition of a [`WakeLock`].
pub struct WakeLockGuard<'a> {
    lock: &'a mut WakeLock,
}

impl WakeLockGuard<'_> {
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }
}

impl Drop for WakeLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
