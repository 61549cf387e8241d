// MIT License - Copyright (c) 2021 TJForc
// External notification scripts

use std::fmt;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// The five notification points of the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// File produced for the receiver (reserved)
    File,
    /// Panel connectivity changed
    Central,
    /// Raw alarm event fields
    Event,
    /// Formatted alarm message
    Message,
    /// Periodic liveness ping
    Watchdog,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Central => "central",
            Self::Event => "event",
            Self::Message => "message",
            Self::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver side of notifications. Invocation must not block the caller.
pub trait HookSink: Send + Sync {
    fn invoke(&self, hook: Hook, argument: String);
}

/// Script paths for every hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookScripts {
    pub file: PathBuf,
    pub central: PathBuf,
    pub event: PathBuf,
    pub message: PathBuf,
    pub watchdog: PathBuf,
}

impl HookScripts {
    pub fn path(&self, hook: Hook) -> &PathBuf {
        match hook {
            Hook::File => &self.file,
            Hook::Central => &self.central,
            Hook::Event => &self.event,
            Hook::Message => &self.message,
            Hook::Watchdog => &self.watchdog,
        }
    }
}

/// Runs the configured script with the argument as its only parameter.
pub struct ScriptHooks {
    scripts: HookScripts,
}

impl ScriptHooks {
    pub fn new(scripts: HookScripts) -> Self {
        Self { scripts }
    }
}

impl HookSink for ScriptHooks {
    fn invoke(&self, hook: Hook, argument: String) {
        let script = self.scripts.path(hook).clone();
        debug!("Invoking {} hook {} {:?}", hook, script.display(), argument);
        tokio::spawn(async move {
            match Command::new(&script).arg(&argument).status().await {
                Ok(status) if status.success() => {
                    info!("Hook {} {:?} succeeded", hook, argument);
                }
                Ok(status) => {
                    warn!("Hook {} {:?} exited with {}", hook, argument, status);
                }
                Err(e) => {
                    warn!("Hook {} ({}) could not run: {}", hook, script.display(), e);
                }
            }
        });
    }
}
