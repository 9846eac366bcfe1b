//! Subprocess backend
//!
//! Runs one MCP server as a child process over stdin/stdout. Activation is
//! all-or-nothing: any failure kills the child and leaves the backend
//! deactivated with an empty tool list, ready for another attempt.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rmcp::model::CallToolRequestParams;
use rmcp::service::Peer;
use rmcp::{RoleClient, ServiceExt};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use toolgate_core::{
    ActivationError, GatewayConfig, ManagedRuntime, ProviderId, ProviderInfo, ProviderKind,
    ServerEntry, ServerKind, ToolArguments, ToolError, ToolOutput, ToolProvider, ToolSpec,
};

use super::client_handler::{convert_tools, BackendClient, BackendClientHandler, ToolsChangedHook};
use super::content::from_call_result;
use super::runtime::plan_launch;
use super::ToolCache;

const STDERR_TAIL_LINES: usize = 200;

/// Launch settings for one subprocess server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

impl SubprocessConfig {
    pub fn from_entry(entry: &ServerEntry) -> Option<Self> {
        match &entry.kind {
            ServerKind::Subprocess {
                command,
                args,
                env,
                working_directory,
            } => Some(Self {
                name: entry.name.clone(),
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
                working_directory: working_directory.clone(),
            }),
            ServerKind::Remote { .. } => None,
        }
    }
}

/// Gateway-wide subprocess settings
#[derive(Debug, Clone)]
pub struct SubprocessSettings {
    pub handshake_timeout: Duration,
    pub grace_period: Duration,
    pub runtimes: Vec<ManagedRuntime>,
}

impl From<&GatewayConfig> for SubprocessSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            handshake_timeout: config.subprocess_handshake_timeout(),
            grace_period: config.subprocess_grace_period(),
            runtimes: config.managed_runtimes.clone(),
        }
    }
}

struct RunningProcess {
    child: Child,
    client: BackendClient,
    stderr_task: Option<JoinHandle<()>>,
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

pub struct SubprocessBackend {
    id: ProviderId,
    config: RwLock<SubprocessConfig>,
    settings: SubprocessSettings,
    tools: ToolCache,
    activated: AtomicBool,
    peer: RwLock<Option<Peer<RoleClient>>>,
    process: tokio::sync::Mutex<Option<RunningProcess>>,
    stderr: StderrTail,
    on_tools_changed: ToolsChangedHook,
}

impl SubprocessBackend {
    pub fn new(
        id: ProviderId,
        config: SubprocessConfig,
        settings: SubprocessSettings,
        on_tools_changed: ToolsChangedHook,
    ) -> Self {
        Self {
            id,
            config: RwLock::new(config),
            settings,
            tools: ToolCache::in_memory(),
            activated: AtomicBool::new(false),
            peer: RwLock::new(None),
            process: tokio::sync::Mutex::new(None),
            stderr: Arc::new(Mutex::new(VecDeque::new())),
            on_tools_changed,
        }
    }

    pub fn config(&self) -> SubprocessConfig {
        self.config.read().clone()
    }

    /// Swap in new launch settings, stopping the running process first.
    /// Returns whether a running server was stopped.
    pub async fn reconfigure(&self, config: SubprocessConfig) -> bool {
        if *self.config.read() == config {
            return false;
        }
        let was_running = self.is_activated();
        self.stop().await;
        info!(
            provider_id = %self.id,
            command = %config.command,
            was_running,
            "[SubprocessBackend] Reconfigured"
        );
        *self.config.write() = config;
        was_running
    }

    /// Last captured stderr lines, oldest first
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr.lock().iter().cloned().collect()
    }

    /// OS process id of the running child
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.child.id())
    }

    /// Terminate the child and wait for it to exit
    pub async fn stop(&self) {
        let mut slot = self.process.lock().await;
        self.activated.store(false, Ordering::SeqCst);
        self.peer.write().take();
        self.tools.clear();

        let Some(process) = slot.take() else {
            return;
        };
        shutdown(process).await;
        info!(provider_id = %self.id, "[SubprocessBackend] Stopped");
    }

    async fn start(&self) -> Result<RunningProcess, ActivationError> {
        let config = self.config();
        let plan = plan_launch(
            &config.command,
            &config.args,
            &config.env,
            config.working_directory.as_deref(),
            &self.settings.runtimes,
        )?;

        info!(
            provider_id = %self.id,
            program = %plan.program.display(),
            args = ?plan.args,
            "[SubprocessBackend] Spawning server"
        );

        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .envs(&plan.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &plan.working_directory {
            command.current_dir(dir);
        }
        // Own process group: a terminal Ctrl-C must not reach the server
        // before the gateway stops it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ActivationError::Spawn(format!("{}: {}", plan.program.display(), e)))?;

        self.stderr.lock().clear();
        let mut stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(self.id.clone(), stderr, self.stderr.clone()));

        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            kill(&mut child, &mut stderr_task).await;
            return Err(ActivationError::Spawn("stdio pipes unavailable".to_string()));
        };

        tokio::time::sleep(self.settings.grace_period).await;
        if let Ok(Some(status)) = child.try_wait() {
            finish_stderr(&mut stderr_task).await;
            return Err(ActivationError::ExitedImmediately {
                status: describe_exit(status),
                stderr: self.stderr_tail(),
            });
        }

        let handler = BackendClientHandler::new(
            self.id.clone(),
            self.tools.clone(),
            self.on_tools_changed.clone(),
        );
        let client = match tokio::time::timeout(
            self.settings.handshake_timeout,
            handler.serve((stdout, stdin)),
        )
        .await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                kill(&mut child, &mut stderr_task).await;
                return Err(ActivationError::Handshake(e.to_string()));
            }
            Err(_) => {
                kill(&mut child, &mut stderr_task).await;
                return Err(ActivationError::HandshakeTimeout(
                    self.settings.handshake_timeout.as_secs(),
                    self.stderr_tail(),
                ));
            }
        };

        let listed = match client.peer().list_all_tools().await {
            Ok(listed) => listed,
            Err(e) => {
                let _ = client.cancel().await;
                kill(&mut child, &mut stderr_task).await;
                return Err(ActivationError::ListTools(e.to_string()));
            }
        };
        self.tools.replace(convert_tools(&listed)).await;

        Ok(RunningProcess {
            child,
            client,
            stderr_task,
        })
    }
}

#[async_trait]
impl ToolProvider for SubprocessBackend {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn info(&self) -> ProviderInfo {
        let config = self.config.read();
        ProviderInfo {
            display_name: config.name.clone(),
            kind: ProviderKind::Subprocess,
            description: Some(format!("stdio:{}", config.command)),
        }
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        if self.is_activated() {
            self.tools.get()
        } else {
            Vec::new()
        }
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn activate(&self) -> Result<(), ActivationError> {
        let mut slot = self.process.lock().await;
        if self.is_activated() && slot.is_some() {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            shutdown(stale).await;
        }

        match self.start().await {
            Ok(process) => {
                *self.peer.write() = Some(process.client.peer().clone());
                *slot = Some(process);
                self.activated.store(true, Ordering::SeqCst);
                info!(
                    provider_id = %self.id,
                    tools = self.tools.len(),
                    "[SubprocessBackend] Activated"
                );
                Ok(())
            }
            Err(e) => {
                self.tools.clear();
                error!(provider_id = %self.id, error = %e, "[SubprocessBackend] Activation failed");
                Err(e)
            }
        }
    }

    async fn deactivate(&self) {
        self.stop().await;
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<ToolOutput, ToolError> {
        let peer = self
            .peer
            .read()
            .clone()
            .ok_or_else(|| ToolError::Unavailable(format!("{} is not running", self.config.read().name)))?;

        debug!(provider_id = %self.id, tool = %name, "[SubprocessBackend] call_tool");
        let result = peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(arguments),
                task: None,
                meta: None,
            })
            .await
            .map_err(|e| ToolError::Remote(e.to_string()))?;
        from_call_result(result)
    }
}

fn spawn_stderr_reader(id: ProviderId, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(provider_id = %id, "[SubprocessBackend] stderr: {}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(provider_id = %id, error = %e, "[SubprocessBackend] stderr closed");
                    break;
                }
            }
        }
    })
}

/// Give the reader a moment to collect what a dying process printed
async fn finish_stderr(task: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = task.take() {
        if tokio::time::timeout(Duration::from_millis(200), handle).await.is_err() {
            debug!("[SubprocessBackend] stderr reader still running");
        }
    }
}

async fn kill(child: &mut Child, stderr_task: &mut Option<JoinHandle<()>>) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "[SubprocessBackend] Failed to kill child");
    }
    finish_stderr(stderr_task).await;
}

async fn shutdown(mut process: RunningProcess) {
    let _ = process.client.cancel().await;
    kill(&mut process.child, &mut process.stderr_task).await;
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => status.to_string(),
    }
}
