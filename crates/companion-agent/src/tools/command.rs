//! Command execution tools.
//!
//! Commands run without a shell: the program name must be on a fixed
//! allowlist and no argument may contain shell metacharacters, so there is
//! no way to chain, redirect, or substitute. Foreground runs are bounded by
//! a timeout; background runs register a [`ProcessSession`] with
//! ring-buffered output, killable by signal (the whole process group, so
//! detached children die too).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use companion_scheduler::types::short_id;

use super::{Tool, ToolCtx, ToolResult};

/// Programs the model may invoke.
const ALLOWED_COMMANDS: &[&str] = &[
    "git", "npm", "ls", "cat", "head", "tail", "wc", "grep", "find", "date", "echo", "pwd",
    "whoami", "uname", "df", "du", "uptime", "free",
];

/// Flags that are rejected regardless of program.
const DANGEROUS_FLAGS: &[&str] = &["--exec", "--eval", "--upload-pack", "--receive-pack"];

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '\n', '<', '>', '$', '(', ')'];

/// Ring buffer capacity per stream.
const OUTPUT_BUFFER_BYTES: usize = 64 * 1024;

/// Validate a command + args against the policy.
pub fn check_command(command: &str, args: &[String]) -> Result<(), String> {
    if !ALLOWED_COMMANDS.contains(&command) {
        return Err(format!(
            "command '{command}' is not allowed (allowed: {})",
            ALLOWED_COMMANDS.join(", ")
        ));
    }

    for piece in std::iter::once(command).chain(args.iter().map(|s| s.as_str())) {
        if piece.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
            return Err(format!("'{piece}' contains shell metacharacters"));
        }
        if DANGEROUS_FLAGS.iter().any(|f| piece.starts_with(f)) {
            return Err(format!("flag '{piece}' is not allowed"));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Background process sessions
// ---------------------------------------------------------------------------

/// Bounded byte buffer: old output is dropped once the cap is hit.
struct RingBuffer {
    data: Vec<u8>,
    cap: usize,
}

impl RingBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.cap {
            let overflow = self.data.len() - self.cap;
            self.data.drain(..overflow);
        }
    }

    fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }
}

struct SessionState {
    command: String,
    started_at: DateTime<Utc>,
    pid: u32,
    output: RingBuffer,
    exit_code: Option<i32>,
}

/// Public view of one background process.
#[derive(Debug, Clone)]
pub struct ProcessSession {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub exit_code: Option<i32>,
}

/// Registry of background processes spawned by the run_command tool.
pub struct ProcessManager {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a validated command detached in its own process group and
    /// register a session capturing its output.
    pub fn spawn_background(&self, command: &str, args: &[String]) -> Result<String, String> {
        check_command(command, args)?;

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // New process group so a later kill reaches detached children.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| format!("spawn failed: {e}"))?;
        let pid = child.id().unwrap_or(0);
        let id = short_id();

        let state = Arc::new(Mutex::new(SessionState {
            command: format!("{command} {}", args.join(" ")),
            started_at: Utc::now(),
            pid,
            output: RingBuffer::new(OUTPUT_BUFFER_BYTES),
            exit_code: None,
        }));
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&state));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Reader + reaper task.
        let state2 = Arc::clone(&state);
        tokio::spawn(async move {
            let pump = |stream: Option<tokio::process::ChildStdout>, state: Arc<Mutex<SessionState>>| async move {
                let Some(mut stream) = stream else { return };
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => state.lock().unwrap().output.push(&buf[..n]),
                    }
                }
            };
            let pump_err = |stream: Option<tokio::process::ChildStderr>, state: Arc<Mutex<SessionState>>| async move {
                let Some(mut stream) = stream else { return };
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => state.lock().unwrap().output.push(&buf[..n]),
                    }
                }
            };

            tokio::join!(
                pump(stdout, Arc::clone(&state2)),
                pump_err(stderr, Arc::clone(&state2)),
            );

            match child.wait().await {
                Ok(status) => {
                    state2.lock().unwrap().exit_code = status.code().or(Some(-1));
                }
                Err(e) => {
                    warn!(error = %e, "background process wait failed");
                    state2.lock().unwrap().exit_code = Some(-1);
                }
            }
        });

        info!(session = %id, pid, command, "background process started");
        Ok(id)
    }

    pub fn list(&self) -> Vec<ProcessSession> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, state)| {
                let s = state.lock().unwrap();
                ProcessSession {
                    id: id.clone(),
                    command: s.command.clone(),
                    started_at: s.started_at,
                    pid: s.pid,
                    exit_code: s.exit_code,
                }
            })
            .collect()
    }

    /// Captured output so far (stdout and stderr interleaved).
    pub fn output(&self, id: &str) -> Option<String> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(id).map(|s| s.lock().unwrap().output.snapshot())
    }

    /// Signal the whole process group. `signal` accepts "TERM" or "KILL".
    pub fn kill(&self, id: &str, signal: &str) -> Result<(), String> {
        let sessions = self.sessions.lock().unwrap();
        let Some(state) = sessions.get(id) else {
            return Err(format!("no such process session: {id}"));
        };
        let s = state.lock().unwrap();
        if s.exit_code.is_some() {
            return Err(format!("process session {id} already exited"));
        }

        #[cfg(unix)]
        {
            let sig = match signal.to_uppercase().as_str() {
                "KILL" | "SIGKILL" | "9" => libc::SIGKILL,
                _ => libc::SIGTERM,
            };
            let rc = unsafe { libc::killpg(s.pid as i32, sig) };
            if rc != 0 {
                return Err(format!("killpg failed for pid {}", s.pid));
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            return Err("process kill is only supported on unix".to_string());
        }
        #[cfg(unix)]
        Ok(())
    }

    /// Drop exited sessions from the registry.
    pub fn reap_finished(&self) {
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, state| state.lock().unwrap().exit_code.is_none());
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub struct RunCommandTool {
    processes: Arc<ProcessManager>,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new(processes: Arc<ProcessManager>, timeout_secs: u64) -> Self {
        Self {
            processes,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn run_foreground(&self, command: &str, args: &[String]) -> ToolResult {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("spawn failed: {e}")),
            Err(_) => {
                return ToolResult::error(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            text.push_str("\n[stderr]\n");
            text.push_str(&stderr);
        }
        if !output.status.success() {
            text.push_str(&format!(
                "\n[exit code: {}]",
                output.status.code().unwrap_or(-1)
            ));
        }
        ToolResult::success(text)
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowlisted command with arguments (no shell). Foreground \
         runs are capped at 30 seconds; pass background=true for long-running \
         commands and check on them with the processes tool."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Program name (e.g. 'git')." },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments, one per element."
                },
                "background": { "type": "boolean", "description": "Run detached and return a session id." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: command");
        };
        let args: Vec<String> = input
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if let Err(e) = check_command(command, &args) {
            return ToolResult::error(e);
        }

        let background = input
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if background {
            match self.processes.spawn_background(command, &args) {
                Ok(id) => ToolResult::success(format!("Background process started, session id: {id}")),
                Err(e) => ToolResult::error(e),
            }
        } else {
            self.run_foreground(command, &args).await
        }
    }
}

pub struct ProcessesTool {
    processes: Arc<ProcessManager>,
}

impl ProcessesTool {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for ProcessesTool {
    fn name(&self) -> &str {
        "processes"
    }

    fn description(&self) -> &str {
        "Manage background processes started by run_command: 'list' shows \
         sessions, 'output' returns captured output, 'kill' signals the \
         process group (TERM by default, or signal=KILL)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "output", "kill"] },
                "session_id": { "type": "string", "description": "Required for output/kill." },
                "signal": { "type": "string", "description": "TERM (default) or KILL." }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _ctx: &ToolCtx, input: serde_json::Value) -> ToolResult {
        let action = input.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "list" => {
                let sessions = self.processes.list();
                if sessions.is_empty() {
                    return ToolResult::success("No background processes.");
                }
                let lines: Vec<String> = sessions
                    .iter()
                    .map(|s| {
                        format!(
                            "{} | pid {} | {} | {}",
                            s.id,
                            s.pid,
                            match s.exit_code {
                                Some(code) => format!("exited ({code})"),
                                None => "running".to_string(),
                            },
                            s.command,
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            "output" => {
                let Some(id) = input.get("session_id").and_then(|v| v.as_str()) else {
                    return ToolResult::error("session_id is required for output");
                };
                match self.processes.output(id) {
                    Some(out) if out.is_empty() => ToolResult::success("(no output yet)"),
                    Some(out) => ToolResult::success(out),
                    None => ToolResult::error(format!("no such process session: {id}")),
                }
            }
            "kill" => {
                let Some(id) = input.get("session_id").and_then(|v| v.as_str()) else {
                    return ToolResult::error("session_id is required for kill");
                };
                let signal = input.get("signal").and_then(|v| v.as_str()).unwrap_or("TERM");
                match self.processes.kill(id, signal) {
                    Ok(()) => ToolResult::success(format!("Signal {signal} sent to session {id}")),
                    Err(e) => ToolResult::error(e),
                }
            }
            other => ToolResult::error(format!("unknown action '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlisted_command_passes() {
        assert!(check_command("ls", &["-la".to_string()]).is_ok());
        assert!(check_command("git", &["status".to_string()]).is_ok());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(check_command("rm", &[]).is_err());
        assert!(check_command("bash", &[]).is_err());
        assert!(check_command("python3", &[]).is_err());
    }

    #[test]
    fn metacharacters_are_rejected() {
        for bad in [
            "a;b",
            "a|b",
            "a&b",
            "`whoami`",
            "$(whoami)",
            "a>b",
            "a<b",
            "line\nbreak",
        ] {
            assert!(
                check_command("echo", &[bad.to_string()]).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn dangerous_flags_are_rejected() {
        assert!(check_command("git", &["--upload-pack=evil".to_string()]).is_err());
        assert!(check_command("npm", &["--eval".to_string()]).is_err());
    }

    #[tokio::test]
    async fn foreground_command_captures_output() {
        let tool = RunCommandTool::new(Arc::new(ProcessManager::new()), 10);
        let result = tool
            .execute(
                &ToolCtx { chat_id: 1 },
                serde_json::json!({"command": "echo", "args": ["hello"]}),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn disallowed_command_returns_error_result() {
        let tool = RunCommandTool::new(Arc::new(ProcessManager::new()), 10);
        let result = tool
            .execute(
                &ToolCtx { chat_id: 1 },
                serde_json::json!({"command": "bash", "args": ["-c", "true"]}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn background_session_captures_output_and_exits() {
        let manager = Arc::new(ProcessManager::new());
        let id = manager
            .spawn_background("echo", &["background".to_string()])
            .unwrap();

        // Give the reader task a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let output = manager.output(&id).unwrap();
        assert!(output.contains("background"));
        let session = manager
            .list()
            .into_iter()
            .find(|s| s.id == id)
            .unwrap();
        assert_eq!(session.exit_code, Some(0));

        manager.reap_finished();
        assert!(manager.output(&id).is_none());
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut rb = RingBuffer::new(8);
        rb.push(b"12345678");
        rb.push(b"AB");
        assert_eq!(rb.snapshot(), "345678AB");
    }
}
