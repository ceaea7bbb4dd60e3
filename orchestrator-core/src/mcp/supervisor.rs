use std::{
    path::PathBuf,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use log::{
    debug,
    warn,
};
use serde_json::Value;
use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncWriteExt,
        BufReader,
    },
    process::{
        Child,
        Command,
    },
    sync::{
        mpsc,
        oneshot,
        Mutex,
    },
    task::JoinHandle,
};

use crate::{
    core::{
        error::OrchestratorError,
        hash::HashMap,
        id::Id,
    },
    mcp::protocol::{
        ChildReply,
        ChildRequest,
        InterpreterKind,
        ToolDescriptor,
    },
};

/// Graceful-shutdown grace period before the child is killed outright
/// (SPEC_FULL.md B.1).
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MCP server status (spec §3/§4.7). The attribute list in §3 also names
/// `disconnected`; the lifecycle narrative in §4.6/§4.7 never distinguishes it
/// from `registered`, so a server that has never connected or has cleanly
/// disconnected is represented the same way here (DESIGN.md records this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum McpServerStatus {
    Registered,
    Online,
    Error,
}

/// A summary row for `mcp.servers.list` (spec §4.5).
#[derive(Debug, Clone, serde::Serialize)]
pub struct McpServerSummary {
    pub id: Id,
    pub name: String,
    pub status: McpServerStatus,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ChildReply>>>>;

struct ChildHandle {
    writer: mpsc::UnboundedSender<String>,
    pending: PendingReplies,
    next_id: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
    child: Arc<Mutex<Option<Child>>>,
}

impl ChildHandle {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, line: String) -> Result<()> {
        self.writer
            .send(line)
            .map_err(|_| OrchestratorError::mcp("child stdin is closed").into())
    }

    async fn request(
        &self,
        request: ChildRequest,
        timeout: Duration,
    ) -> Result<ChildReply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request.id, tx);
        }
        if let Err(err) = self.send(request.to_line()).await {
            self.pending.lock().await.remove(&request.id);
            return Err(err);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(OrchestratorError::mcp("child process disconnected mid-request").into()),
            Err(_) => {
                self.pending.lock().await.remove(&request.id);
                Err(OrchestratorError::mcp("MCP child timed out").into())
            }
        }
    }

    async fn reject_all_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(ChildReply {
                id: 0,
                result: None,
                error: Some(reason.to_owned()),
                tools: None,
                metadata: None,
            });
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

struct ServerEntry {
    name: String,
    interpreter: InterpreterKind,
    script_path: PathBuf,
    status: McpServerStatus,
    tools: Vec<ToolDescriptor>,
    handle: Option<ChildHandle>,
}

type ServerMap = Arc<Mutex<HashMap<Id, ServerEntry>>>;

/// Owns MCP child processes declared in configuration or registered at
/// runtime (spec §4.6). One live child per server id; stdin writes are
/// serialized through a single mpsc channel so messages are never
/// interleaved.
///
/// `servers` is `Arc`-wrapped (unlike the other registries, which are plain
/// fields behind the `RouterContext`'s own `Arc`) so the reader pump spawned
/// per child in [`McpSupervisor::connect`] can report an unexpected process
/// exit straight back into the table without needing a handle to the whole
/// supervisor.
pub struct McpSupervisor {
    servers: ServerMap,
}

impl Default for McpSupervisor {
    fn default() -> Self {
        Self {
            servers: Arc::new(Mutex::new(HashMap::default())),
        }
    }
}

impl McpSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a server without spawning it (spec §4.6: "declared at config
    /// load -> registered").
    pub async fn declare(
        &self,
        id: Id,
        name: impl Into<String>,
        interpreter: InterpreterKind,
        script_path: PathBuf,
    ) {
        let mut servers = self.servers.lock().await;
        servers.insert(
            id,
            ServerEntry {
                name: name.into(),
                interpreter,
                script_path,
                status: McpServerStatus::Registered,
                tools: Vec::new(),
                handle: None,
            },
        );
    }

    pub async fn status(&self, id: Id) -> Option<McpServerStatus> {
        self.servers.lock().await.get(&id).map(|entry| entry.status)
    }

    /// Lists every declared server with its current status (spec §4.5
    /// `mcp.servers.list`).
    pub async fn list(&self) -> Vec<McpServerSummary> {
        self.servers
            .lock()
            .await
            .iter()
            .map(|(id, entry)| McpServerSummary {
                id: *id,
                name: entry.name.clone(),
                status: entry.status,
            })
            .collect()
    }

    /// Resolves a declared server by id or name (spec §4.5 resolves MCP
    /// servers "by id").
    pub async fn resolve_id(&self, reference: &str) -> Option<Id> {
        if let Ok(uuid) = reference.parse::<uuid::Uuid>() {
            let id = Id::from(uuid);
            if self.servers.lock().await.contains_key(&id) {
                return Some(id);
            }
        }
        let servers = self.servers.lock().await;
        servers
            .iter()
            .find(|(_, entry)| entry.name.eq_ignore_ascii_case(reference))
            .map(|(id, _)| *id)
    }

    pub async fn cached_tools(&self, id: Id) -> Option<Vec<ToolDescriptor>> {
        self.servers.lock().await.get(&id).map(|entry| entry.tools.clone())
    }

    /// Spawns the child, performs the `initialize` + `list_tools` handshake,
    /// and caches the tool catalogue, bringing the server to `online` (spec
    /// §4.6). A no-op if already online.
    pub async fn connect(&self, id: Id) -> Result<()> {
        {
            let servers = self.servers.lock().await;
            match servers.get(&id) {
                Some(entry) if entry.status == McpServerStatus::Online => return Ok(()),
                Some(_) => {}
                None => return Err(OrchestratorError::mcp(format!("unknown MCP server {id}")).into()),
            }
        }

        let (interpreter, script_path) = {
            let servers = self.servers.lock().await;
            let entry = servers.get(&id).expect("checked above");
            (entry.interpreter, entry.script_path.clone())
        };

        let mut command = Command::new(interpreter.executable());
        command
            .arg(&script_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| OrchestratorError::mcp(format!("failed to spawn MCP server {id}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestratorError::mcp("MCP child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::mcp("MCP child stdout unavailable"))?;
        let stderr = child.stderr.take();

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::default()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));
        let reader_handle = tokio::spawn(reader_task(stdout, pending.clone(), id, self.servers.clone()));
        let mut tasks = vec![writer_handle, reader_handle];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr, id)));
        }

        let handle = ChildHandle {
            writer: writer_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            tasks,
            child: Arc::new(Mutex::new(Some(child))),
        };

        let init_id = handle.next_request_id();
        let init_result = handle
            .request(ChildRequest::initialize(init_id), Duration::from_secs(10))
            .await;
        if let Err(err) = init_result {
            let mut servers = self.servers.lock().await;
            if let Some(entry) = servers.get_mut(&id) {
                entry.status = McpServerStatus::Error;
            }
            return Err(err);
        }

        let list_id = handle.next_request_id();
        let tools_reply = handle
            .request(ChildRequest::list_tools(list_id), Duration::from_secs(10))
            .await?;
        let tools = tools_reply.tools.unwrap_or_default();

        let mut servers = self.servers.lock().await;
        if let Some(entry) = servers.get_mut(&id) {
            entry.tools = tools;
            entry.status = McpServerStatus::Online;
            entry.handle = Some(handle);
        }
        debug!("MCP server {id} online with {} tools", servers.get(&id).map(|e| e.tools.len()).unwrap_or(0));
        Ok(())
    }

    /// Forwards a `tool_call`, connecting the server first if it is not
    /// already online (spec §4.5).
    pub async fn tool_call(&self, id: Id, tool_name: &str, args: Value) -> Result<Value> {
        self.connect(id).await?;

        let (request_id, timeout) = {
            let servers = self.servers.lock().await;
            let entry = servers
                .get(&id)
                .ok_or_else(|| OrchestratorError::mcp(format!("unknown MCP server {id}")))?;
            if entry.status != McpServerStatus::Online {
                return Err(OrchestratorError::mcp(format!("MCP server {id} is not connected")).into());
            }
            let handle = entry.handle.as_ref().expect("online implies a live handle");
            (handle.next_request_id(), Duration::from_secs(60))
        };

        let reply = {
            let servers = self.servers.lock().await;
            let entry = servers.get(&id).expect("checked above");
            let handle = entry.handle.as_ref().expect("online implies a live handle");
            handle
                .request(ChildRequest::tool_call(request_id, tool_name, args), timeout)
                .await?
        };

        if let Some(error) = reply.error {
            return Err(OrchestratorError::mcp(error).into());
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Attempts a graceful `shutdown`, falling back to killing the process
    /// after [`SHUTDOWN_GRACE`] (spec §4.6).
    pub async fn disconnect(&self, id: Id) -> Result<()> {
        let handle = {
            let mut servers = self.servers.lock().await;
            let entry = servers
                .get_mut(&id)
                .ok_or_else(|| OrchestratorError::mcp(format!("unknown MCP server {id}")))?;
            entry.status = McpServerStatus::Registered;
            entry.handle.take()
        };

        let Some(handle) = handle else {
            return Ok(());
        };

        let shutdown_id = handle.next_request_id();
        let graceful = tokio::time::timeout(
            SHUTDOWN_GRACE,
            handle.request(ChildRequest::shutdown(shutdown_id), SHUTDOWN_GRACE),
        )
        .await;
        if graceful.is_err() {
            warn!("MCP server {id} did not shut down gracefully, killing");
        }
        handle.reject_all_pending("MCP server disconnected").await;
        // handle drops here, which aborts pump tasks and kills the child if
        // it is still alive.
        Ok(())
    }
}

/// Marks a server `error` and rejects its in-flight calls after its reader
/// pump observes stdout close (spec §4.7: crash transitions out of `online`
/// into `error`). A no-op if the entry's handle is already gone, which means
/// [`McpSupervisor::disconnect`] already took it through the graceful path,
/// and the exit we're observing is just that process finally dying.
async fn mark_unexpected_exit(servers: ServerMap, pending: PendingReplies, server_id: Id) {
    let still_live = {
        let mut servers = servers.lock().await;
        let Some(entry) = servers.get_mut(&server_id) else {
            return;
        };
        if entry.handle.is_none() {
            false
        } else {
            entry.status = McpServerStatus::Error;
            entry.handle = None;
            true
        }
    };
    if !still_live {
        return;
    }
    warn!("MCP server {server_id} exited unexpectedly");
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(ChildReply {
            id: 0,
            result: None,
            error: Some("MCP server process exited unexpectedly".to_owned()),
            tools: None,
            metadata: None,
        });
    }
}

async fn writer_task(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if stdin.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(stdout: tokio::process::ChildStdout, pending: PendingReplies, server_id: Id, servers: ServerMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ChildReply::parse_line(&line) {
                    Ok(reply) => {
                        let mut pending = pending.lock().await;
                        if let Some(tx) = pending.remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(err) => warn!("MCP server {server_id}: malformed stdout line: {err}"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("MCP server {server_id}: error reading stdout: {err}");
                break;
            }
        }
    }
    debug!("MCP server {server_id}: stdout closed");
    mark_unexpected_exit(servers, pending, server_id).await;
}

async fn stderr_task(stderr: tokio::process::ChildStderr, server_id: Id) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("MCP server {server_id} stderr: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn declared_server_starts_registered() {
        let supervisor = McpSupervisor::new();
        let id = Id::new();
        supervisor
            .declare(id, "calc", InterpreterKind::Node, PathBuf::from("./calc.js"))
            .await;
        assert_eq!(supervisor.status(id).await, Some(McpServerStatus::Registered));
    }

    #[tokio::test]
    async fn tool_call_on_unknown_server_errors() {
        let supervisor = McpSupervisor::new();
        let err = supervisor
            .tool_call(Id::new(), "add", Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown MCP server"));
    }
}
