//! OS signal routing
//!
//! `SIGINT`/`SIGTERM` terminate the manager, `SIGTSTP` quiets it. On
//! platforms without Unix signals only Ctrl-C is observed.

use std::io;

use crate::manager::LifecycleCommand;

/// Process signals the manager reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// `SIGINT` or Ctrl-C
    Interrupt,
    /// `SIGTERM`
    Terminate,
    /// `SIGTSTP`
    Suspend,
}

impl ProcessSignal {
    /// Lifecycle transition the signal maps to
    pub fn route(self) -> LifecycleCommand {
        match self {
            Self::Interrupt | Self::Terminate => LifecycleCommand::Terminate,
            Self::Suspend => LifecycleCommand::Quiet,
        }
    }
}

impl std::fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Suspend => write!(f, "SIGTSTP"),
        }
    }
}

/// Installed signal handlers
///
/// Installing replaces the default disposition, so a `SIGTSTP` no longer
/// stops the process once a listener exists.
#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    suspend: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Install handlers; must be called inside a Tokio runtime
    pub fn new() -> io::Result<Self> {
        use nix::sys::signal::Signal as NixSignal;
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            suspend: signal(SignalKind::from_raw(NixSignal::SIGTSTP as i32))?,
        })
    }

    /// Wait for the next signal; `None` once no more can arrive
    pub async fn recv(&mut self) -> Option<ProcessSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(ProcessSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(ProcessSignal::Terminate),
            Some(()) = self.suspend.recv() => Some(ProcessSignal::Suspend),
            else => None,
        }
    }
}

#[cfg(not(unix))]
pub struct SignalListener {
    _private: (),
}

#[cfg(not(unix))]
impl SignalListener {
    pub fn new() -> io::Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> Option<ProcessSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ProcessSignal::Interrupt)
    }
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener").finish_non_exhaustive()
    }
}
