//! Login-shell PATH for child processes
//!
//! A gateway started from a desktop launcher inherits a bare PATH, so
//! user-installed tools (Homebrew, nvm, Volta, `~/.local/bin`) are invisible
//! to subprocess backends. The login shell's PATH is read once and merged in
//! front of the process PATH.

use std::sync::OnceLock;
use tracing::{debug, info, warn};

#[cfg(unix)]
const SEPARATOR: char = ':';
#[cfg(not(unix))]
const SEPARATOR: char = ';';

static SHELL_PATH: OnceLock<Option<String>> = OnceLock::new();

/// The merged login-shell PATH, resolved on first use
///
/// `None` on Windows (GUI processes already get the full user PATH) and
/// whenever the shell cannot be queried.
pub fn shell_path() -> Option<&'static str> {
    SHELL_PATH
        .get_or_init(|| {
            #[cfg(unix)]
            {
                resolve_login_path()
            }
            #[cfg(not(unix))]
            {
                None
            }
        })
        .as_deref()
}

#[cfg(unix)]
fn resolve_login_path() -> Option<String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    debug!(shell = %shell, "[ShellEnv] Resolving login PATH");

    // -i picks up rc files where version managers hook in; some shells
    // refuse it without a tty
    let Some(login_path) = query_shell(&shell, &["-l", "-i", "-c"])
        .or_else(|| query_shell(&shell, &["-l", "-c"]))
    else {
        warn!(shell = %shell, "[ShellEnv] Could not read login PATH, keeping process PATH");
        return None;
    };

    let process_path = std::env::var("PATH").unwrap_or_default();
    let merged = merge_paths([login_path.as_str(), process_path.as_str()]);
    info!(
        entries = merged.split(SEPARATOR).count(),
        "[ShellEnv] Login PATH resolved"
    );
    Some(merged)
}

#[cfg(unix)]
fn query_shell(shell: &str, flags: &[&str]) -> Option<String> {
    use std::process::{Command, Stdio};

    let output = Command::new(shell)
        .args(flags)
        .arg(r#"printf "%s" "$PATH""#)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!path.is_empty()).then_some(path)
        }
        Ok(output) => {
            debug!(status = %output.status, ?flags, "[ShellEnv] Shell query failed");
            None
        }
        Err(e) => {
            debug!(error = %e, "[ShellEnv] Failed to spawn shell");
            None
        }
    }
}

/// Join PATH lists in order, dropping empty and repeated entries
pub fn merge_paths<'a>(lists: impl IntoIterator<Item = &'a str>) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<&str> = Vec::new();

    for entry in lists.into_iter().flat_map(|list| list.split(SEPARATOR)) {
        if !entry.is_empty() && seen.insert(entry) {
            merged.push(entry);
        }
    }

    merged.join(&SEPARATOR.to_string())
}
