//! Container-backed execution oracle.
//!
//! Stages generated code in a temporary directory, mounts it read-only into
//! a fresh container with networking disabled and memory/CPU caps, and waits
//! under an outer wall-clock timeout that is independent of whatever the
//! generated code does. The container is removed after every call.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::SandboxLimits;
use crate::errors::{AgentError, AgentResult};
use crate::sandbox::ExecutionOracle;
use crate::types::{ArgMap, InvokeOutput, VerificationReport};

pub struct ContainerSandbox {
    runtime: String,
    image: String,
    timeout: Duration,
    memory_mb: u64,
    cpu_share: f64,
}

impl ContainerSandbox {
    pub fn new(limits: &SandboxLimits) -> Self {
        Self {
            runtime: std::env::var("TOOLFORGE_CONTAINER_RUNTIME")
                .unwrap_or_else(|_| "docker".to_string()),
            image: limits.image(),
            timeout: Duration::from_secs(limits.timeout_secs()),
            memory_mb: limits.memory_mb(),
            cpu_share: limits.cpu_share(),
        }
    }

    /// Rewrite test imports to pull the function from the staged module
    /// instead of whatever module name the oracle assumed.
    fn patch_test_imports(name: &str, tests: &str) -> String {
        let mut lines = vec![format!("from tool_function import {name}")];
        for line in tests.lines() {
            if line.contains(&format!("from {name}")) && line.contains("import") {
                lines.push(format!("# {line}"));
            } else {
                lines.push(line.to_string());
            }
        }
        lines.join("\n")
    }

    fn invoke_runner(name: &str) -> String {
        format!(
            r#"import json
from tool_function import {name}

with open("/code/args.json", "r", encoding="utf-8") as fh:
    args = json.load(fh)
try:
    result = {name}(**args)
    print("TOOLFORGE_RESULT:" + json.dumps({{"success": True, "value": result}}, default=str))
except Exception as exc:
    print("TOOLFORGE_RESULT:" + json.dumps({{"success": False, "error": f"{{type(exc).__name__}}: {{exc}}"}}))
"#
        )
    }

    async fn run_container(&self, code_dir: &Path, command: &[&str]) -> AgentResult<(bool, String)> {
        let mount = format!("{}:/code:ro", code_dir.display());
        let memory = format!("{}m", self.memory_mb);
        let cpus = format!("{}", self.cpu_share);
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run")
            .arg("--rm")
            .arg("--network=none")
            .arg("--memory")
            .arg(&memory)
            .arg("--cpus")
            .arg(&cpus)
            .arg("-v")
            .arg(&mount)
            .arg(&self.image)
            .args(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| AgentError::OracleUnavailable(format!("cannot start sandbox: {e}")))?;

        // Outer wall-clock bound, independent of anything the generated code
        // does inside the container.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok((output.status.success(), combined))
            }
            Ok(Err(e)) => Err(AgentError::OracleUnavailable(format!(
                "sandbox process failed: {e}"
            ))),
            Err(_) => {
                log::warn!(
                    "sandbox container exceeded the {}s wall-clock limit, killing it",
                    self.timeout.as_secs()
                );
                Ok((
                    false,
                    format!("execution timed out after {}s", self.timeout.as_secs()),
                ))
            }
        }
    }
}

#[async_trait]
impl ExecutionOracle for ContainerSandbox {
    async fn verify(
        &self,
        name: &str,
        source: &str,
        tests: &str,
        data_files: &[(String, String)],
    ) -> AgentResult<VerificationReport> {
        let staging = tempfile::tempdir()
            .map_err(|e| AgentError::Internal(format!("sandbox staging dir: {e}")))?;
        tokio::fs::write(staging.path().join("tool_function.py"), source)
            .await
            .map_err(|e| AgentError::Internal(format!("stage source: {e}")))?;
        tokio::fs::write(
            staging.path().join("test_tool.py"),
            Self::patch_test_imports(name, tests),
        )
        .await
        .map_err(|e| AgentError::Internal(format!("stage tests: {e}")))?;
        for (file_name, contents) in data_files {
            tokio::fs::write(staging.path().join(file_name), contents)
                .await
                .map_err(|e| AgentError::Internal(format!("stage data file {file_name}: {e}")))?;
        }

        let (passed, output) = self
            .run_container(staging.path(), &["pytest", "-v", "/code/test_tool.py"])
            .await?;
        tracing::debug!(tool = name, passed, "sandbox verification finished");
        Ok(VerificationReport { passed, output })
    }

    async fn invoke(&self, name: &str, source: &str, args: &ArgMap) -> AgentResult<InvokeOutput> {
        let staging = tempfile::tempdir()
            .map_err(|e| AgentError::Internal(format!("sandbox staging dir: {e}")))?;
        tokio::fs::write(staging.path().join("tool_function.py"), source)
            .await
            .map_err(|e| AgentError::Internal(format!("stage source: {e}")))?;
        tokio::fs::write(staging.path().join("runner.py"), Self::invoke_runner(name))
            .await
            .map_err(|e| AgentError::Internal(format!("stage runner: {e}")))?;
        let args_json = serde_json::to_string(&serde_json::Value::Object(args.clone()))
            .map_err(|e| AgentError::Internal(format!("serialize args: {e}")))?;
        tokio::fs::write(staging.path().join("args.json"), args_json)
            .await
            .map_err(|e| AgentError::Internal(format!("stage args: {e}")))?;

        let (_, output) = self
            .run_container(staging.path(), &["python", "/code/runner.py"])
            .await?;

        // The runner prints a single tagged JSON line; anything the tool
        // itself printed comes before it.
        let verdict = output
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("TOOLFORGE_RESULT:"));
        match verdict {
            Some(json) => {
                let parsed: serde_json::Value = serde_json::from_str(json).map_err(|e| {
                    AgentError::Internal(format!("sandbox runner emitted bad JSON: {e}"))
                })?;
                let success = parsed["success"].as_bool().unwrap_or(false);
                if success {
                    Ok(InvokeOutput {
                        success: true,
                        value: parsed["value"].clone(),
                        error: None,
                    })
                } else {
                    Ok(InvokeOutput {
                        success: false,
                        value: serde_json::Value::Null,
                        error: Some(
                            parsed["error"].as_str().unwrap_or("unknown error").to_string(),
                        ),
                    })
                }
            }
            // The runner never got to print: crash, OOM kill, or timeout.
            None => Ok(InvokeOutput {
                success: false,
                value: serde_json::Value::Null,
                error: Some(output),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_stale_test_imports() {
        let patched = ContainerSandbox::patch_test_imports(
            "reverse_string",
            "from reverse_string import reverse_string\n\ndef test_basic():\n    assert reverse_string('ab') == 'ba'",
        );
        assert!(patched.starts_with("from tool_function import reverse_string"));
        assert!(patched.contains("# from reverse_string import reverse_string"));
    }

    #[test]
    fn runner_reads_args_and_tags_result() {
        let runner = ContainerSandbox::invoke_runner("margin");
        assert!(runner.contains("from tool_function import margin"));
        assert!(runner.contains("TOOLFORGE_RESULT:"));
    }
}
