use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use aegis_common::types::Violation;
use aegis_common::OrgId;

use super::SandboxLimits;

/// One evaluation request, written to the plugin process as a single JSON
/// line on stdin.
pub struct SandboxRequest<'a> {
    pub evaluator: &'a str,
    pub org_id: &'a OrgId,
    pub prompt: &'a str,
    pub response: &'a str,
}

/// The actual stdin payload: the request plus the manifest's sandbox
/// limits, so the plugin runtime can configure itself. The gateway
/// enforces the wall clock either way.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    evaluator: &'a str,
    org_id: &'a OrgId,
    prompt: &'a str,
    response: &'a str,
    memory_mb: u64,
    network_access: bool,
    allowed_domains: &'a [String],
}

/// The plugin's reply: a single JSON line on stdout.
#[derive(Debug, Deserialize)]
pub struct SandboxVerdict {
    pub score: f64,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Plugin process spawn failed: {0}")]
    Spawn(String),

    #[error("Plugin I/O error: {0}")]
    Io(String),

    #[error("Plugin exceeded its {0:?} timeout")]
    Timeout(Duration),

    #[error("Plugin produced invalid output: {0}")]
    Protocol(String),
}

/// Runs plugin evaluators as short-lived sub-processes speaking a
/// JSON-lines protocol. One process per invocation — no shared state
/// survives between evaluations.
pub struct SandboxRunner {
    command: PathBuf,
    limits: SandboxLimits,
}

impl SandboxRunner {
    pub fn new(command: PathBuf, limits: SandboxLimits) -> Self {
        Self { command, limits }
    }

    /// Execute one evaluation. The child is killed at the timeout.
    pub async fn run(
        &self,
        request: &SandboxRequest<'_>,
        timeout: Duration,
    ) -> Result<SandboxVerdict, SandboxError> {
        let start = std::time::Instant::now();

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_clear()
            .env("SANDBOX_MEMORY_MB", self.limits.memory_mb.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;

        let wire = WireRequest {
            evaluator: request.evaluator,
            org_id: request.org_id,
            prompt: request.prompt,
            response: request.response,
            memory_mb: self.limits.memory_mb,
            network_access: self.limits.network_access,
            allowed_domains: &self.limits.allowed_domains,
        };
        let payload =
            serde_json::to_string(&wire).map_err(|e| SandboxError::Io(e.to_string()))?;

        let outcome = tokio::time::timeout(timeout, async {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| SandboxError::Io("child stdin unavailable".into()))?;
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| SandboxError::Io(e.to_string()))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| SandboxError::Io(e.to_string()))?;
            drop(stdin);

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| SandboxError::Io("child stdout unavailable".into()))?;
            let mut line = String::new();
            BufReader::new(stdout)
                .read_line(&mut line)
                .await
                .map_err(|e| SandboxError::Io(e.to_string()))?;

            if line.trim().is_empty() {
                return Err(SandboxError::Protocol("empty reply from plugin".into()));
            }

            serde_json::from_str::<SandboxVerdict>(line.trim())
                .map_err(|e| SandboxError::Protocol(e.to_string()))
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                metrics::counter!("evaluators.plugin.timeouts").increment(1);
                Err(SandboxError::Timeout(timeout))
            }
        };

        // Reap the child; it either exited or was killed above.
        let _ = child.wait().await;

        metrics::histogram!("evaluators.plugin.latency").record(start.elapsed().as_secs_f64());

        if let Ok(verdict) = &result {
            if !(0.0..=1.0).contains(&verdict.score) {
                return Err(SandboxError::Protocol(format!(
                    "score out of range: {}",
                    verdict.score
                )));
            }
        }

        result
    }
}
