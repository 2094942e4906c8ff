//! Process tree termination.
//!
//! The launched backend may fork helpers (debugpy spawns the debuggee, for
//! example), so killing only the direct child can leave orphans holding the
//! debug port. [`TreeKiller`] kills descendants first, then the root.

use std::io;

use log::debug;

use crate::BoxFuture;

/// Kills a process together with all of its descendants.
pub trait ProcessTerminator: Send + Sync {
    fn kill_tree(&self, pid: u32) -> BoxFuture<'_, io::Result<()>>;
}

/// Platform implementation of [`ProcessTerminator`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeKiller;

impl ProcessTerminator for TreeKiller {
    fn kill_tree(&self, pid: u32) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            debug!(target: "debug_relay::process", "Killing process tree rooted at {}", pid);
            platform::kill_tree(pid).await
        })
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::collections::HashMap;
    use std::io;

    use log::trace;
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    pub(super) async fn kill_tree(root: u32) -> io::Result<()> {
        for pid in super::descendants_leaf_first(root, &process_table()) {
            match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => trace!(
                    target: "debug_relay::process",
                    "Failed to kill descendant {}: {}",
                    pid,
                    e
                ),
            }
        }
        kill(Pid::from_raw(root as i32), Signal::SIGKILL).map_err(io::Error::from)
    }

    /// pid -> parent pid for every visible process.
    fn process_table() -> HashMap<u32, u32> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return HashMap::new();
        };
        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter_map(|pid| {
                let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
                Some((pid, super::parse_parent_pid(&stat)?))
            })
            .collect()
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use std::io;

    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;

    pub(super) async fn kill_tree(root: u32) -> io::Result<()> {
        let pid = Pid::from_raw(root as i32);
        // Only effective when the backend leads its own process group
        let _ = killpg(pid, Signal::SIGKILL);
        kill(pid, Signal::SIGKILL).map_err(io::Error::from)
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::process::Stdio;

    pub(super) async fn kill_tree(root: u32) -> io::Result<()> {
        let status = tokio::process::Command::new("taskkill")
            .args(["/PID", &root.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {}", status)))
        }
    }
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are read after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_parent_pid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Every descendant of `root`, deepest first.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn descendants_leaf_first(root: u32, parents: &std::collections::HashMap<u32, u32>) -> Vec<u32> {
    let mut order = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        let mut children: Vec<u32> = parents
            .iter()
            .filter(|&(&pid, &ppid)| ppid == parent && pid != parent)
            .map(|(&pid, _)| pid)
            .collect();
        children.sort_unstable();
        order.extend(children.iter().copied());
        frontier.extend(children);
    }
    order.reverse();
    order
}
