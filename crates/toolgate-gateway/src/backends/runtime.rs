//! Executable and environment resolution for subprocess backends
//!
//! Commands owned by a managed runtime only ever resolve inside that
//! runtime's bundled bin directory. If the bundle is missing, activation
//! fails instead of quietly picking up whatever interpreter is on PATH.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use toolgate_core::{ActivationError, ManagedRuntime};

use super::shell_env::{merge_paths, shell_path};

/// Everything needed to spawn one backend process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

/// Split `command` shell-style when it carries its own arguments
pub fn split_command(command: &str, args: &[String]) -> Result<(String, Vec<String>), ActivationError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(ActivationError::InvalidConfig("Command is empty".to_string()));
    }
    if !args.is_empty() || !command.contains(char::is_whitespace) || Path::new(command).exists() {
        return Ok((command.to_string(), args.to_vec()));
    }

    let mut words = shell_words::split(command)
        .map_err(|e| ActivationError::InvalidConfig(format!("Cannot parse command '{}': {}", command, e)))?;
    if words.is_empty() {
        return Err(ActivationError::InvalidConfig("Command is empty".to_string()));
    }
    let program = words.remove(0);
    Ok((program, words))
}

pub fn plan_launch(
    command: &str,
    args: &[String],
    overrides: &BTreeMap<String, String>,
    working_directory: Option<&Path>,
    runtimes: &[ManagedRuntime],
) -> Result<LaunchPlan, ActivationError> {
    let (program, args) = split_command(command, args)?;
    let program_path = Path::new(&program);

    let runtime = if program_path.is_absolute() {
        None
    } else {
        let name = program_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&program);
        runtimes.iter().find(|runtime| runtime.owns(name))
    };

    let search_path = build_search_path(runtime, overrides);

    let resolved = if program_path.is_absolute() {
        if !program_path.exists() {
            return Err(ActivationError::CommandNotFound { command: program.clone() });
        }
        program_path.to_path_buf()
    } else if let Some(runtime) = runtime {
        resolve_in_runtime(runtime, &program)?
    } else {
        let cwd = working_directory
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        which::which_in(&program, Some(&search_path), cwd)
            .map_err(|_| ActivationError::CommandNotFound { command: program.clone() })?
    };

    debug!(
        command = %program,
        resolved = %resolved.display(),
        runtime = ?runtime.map(|r| &r.name),
        "[Runtime] Resolved executable"
    );

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), search_path);
    for (key, value) in overrides {
        if key != "PATH" {
            env.insert(key.clone(), value.clone());
        }
    }

    Ok(LaunchPlan {
        program: resolved,
        args,
        env,
        working_directory: working_directory.map(Path::to_path_buf),
    })
}

/// Runtime bin dir, then a user PATH override, then the login-shell PATH
fn build_search_path(runtime: Option<&ManagedRuntime>, overrides: &BTreeMap<String, String>) -> String {
    let runtime_dir = runtime.map(|r| r.bin_dir.to_string_lossy().into_owned());
    let process_path = std::env::var("PATH").unwrap_or_default();
    let ambient = shell_path().unwrap_or(process_path.as_str());

    merge_paths(
        runtime_dir
            .as_deref()
            .into_iter()
            .chain(overrides.get("PATH").map(String::as_str))
            .chain(std::iter::once(ambient)),
    )
}

fn resolve_in_runtime(runtime: &ManagedRuntime, program: &str) -> Result<PathBuf, ActivationError> {
    let candidates: &[&str] = if cfg!(windows) { &["", ".exe", ".cmd"] } else { &[""] };
    candidates
        .iter()
        .map(|ext| runtime.bin_dir.join(format!("{}{}", program, ext)))
        .find(|path| path.is_file())
        .ok_or_else(|| ActivationError::RuntimeMissing {
            runtime: format!("{} {}", runtime.name, runtime.version),
            expected: runtime.bin_dir.join(program).display().to_string(),
        })
}
