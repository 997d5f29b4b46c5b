use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::collaborators::Provisioner;
use crate::engine::types::DeploymentReport;
use crate::stages::markers::declared_resources;

const HASH_FILE: &str = ".infraflow-hash";
const APPLIED_FILE: &str = ".infraflow-applied";

fn content_hash(artifact: &str, variables: &BTreeMap<String, String>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(artifact.as_bytes());
    hasher.update(serde_json::to_vec(variables)?);
    Ok(hex::encode(hasher.finalize()))
}

async fn read_marker(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Writes the artifact into `<root>/<execution_id>/` without applying it.
///
/// Re-running with identical inputs leaves the workspace untouched.
pub struct WorkspaceProvisioner {
    root: PathBuf,
}

impl WorkspaceProvisioner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn workspace(&self, execution_id: &str) -> Result<PathBuf> {
        if execution_id.is_empty()
            || !execution_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("Invalid execution id for workspace: {:?}", execution_id);
        }
        Ok(self.root.join(execution_id))
    }

    /// Materialize the workspace; returns its path and content hash.
    pub async fn prepare(
        &self,
        execution_id: &str,
        artifact: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(PathBuf, String)> {
        let dir = self.workspace(execution_id)?;
        let hash = content_hash(artifact, variables)?;

        if read_marker(&dir.join(HASH_FILE)).await.as_deref() == Some(hash.as_str()) {
            info!(workspace = %dir.display(), "Workspace already up to date");
            return Ok((dir, hash));
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create workspace: {}", dir.display()))?;
        write_atomic(&dir.join("main.tf"), artifact.as_bytes()).await?;
        write_atomic(
            &dir.join("terraform.tfvars.json"),
            &serde_json::to_vec_pretty(variables)?,
        )
        .await?;
        write_atomic(&dir.join(HASH_FILE), hash.as_bytes()).await?;

        info!(workspace = %dir.display(), "Workspace written");
        Ok((dir, hash))
    }
}

fn resource_names(artifact: &str) -> Vec<String> {
    declared_resources(artifact)
        .into_iter()
        .map(|(kind, name)| format!("{}.{}", kind, name))
        .collect()
}

#[async_trait]
impl Provisioner for WorkspaceProvisioner {
    async fn deploy(
        &self,
        execution_id: &str,
        artifact: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentReport> {
        let (dir, _) = self.prepare(execution_id, artifact, variables).await?;
        Ok(DeploymentReport {
            success: true,
            resources: resource_names(artifact),
            error: None,
            workspace: Some(dir.display().to_string()),
        })
    }
}

/// Output of one external command.
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command in its own process group; the whole group is killed on timeout.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout_s: f64,
) -> Result<CommandOutput> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).current_dir(cwd);

    #[cfg(unix)]
    {
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    // Dropping the timed-out future drops the child; tokio then reaps it.
    command
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", program))?;

    #[cfg(unix)]
    let child_pid = child.id();

    let duration = std::time::Duration::try_from_secs_f64(timeout_s.max(0.0))
        .unwrap_or(std::time::Duration::ZERO);
    let result = tokio::time::timeout(duration, child.wait_with_output()).await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => bail!("Failed to run '{}': {}", program, e),
        Err(_) => {
            #[cfg(unix)]
            if let Some(pid) = child_pid {
                // Negative PID signals the whole process group
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
            bail!(
                "'{} {}' timed out after {}s (process group killed)",
                program,
                args.join(" "),
                timeout_s
            );
        }
    };

    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Applies the workspace with the terraform CLI.
pub struct TerraformProvisioner {
    workspace: WorkspaceProvisioner,
    binary: String,
    timeout_s: f64,
}

impl TerraformProvisioner {
    pub fn new(root: impl AsRef<Path>, binary: impl Into<String>, timeout_s: f64) -> Self {
        Self {
            workspace: WorkspaceProvisioner::new(root),
            binary: binary.into(),
            timeout_s,
        }
    }

    fn failed(dir: &Path, step: &str, output: &CommandOutput) -> DeploymentReport {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        DeploymentReport {
            success: false,
            resources: Vec::new(),
            error: Some(format!(
                "terraform {} exited with code {}: {}",
                step, output.code, detail
            )),
            workspace: Some(dir.display().to_string()),
        }
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn deploy(
        &self,
        execution_id: &str,
        artifact: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<DeploymentReport> {
        let (dir, hash) = self
            .workspace
            .prepare(execution_id, artifact, variables)
            .await?;
        let applied_marker = dir.join(APPLIED_FILE);

        if read_marker(&applied_marker).await.as_deref() == Some(hash.as_str()) {
            info!(workspace = %dir.display(), "Artifact already applied");
            return Ok(DeploymentReport {
                success: true,
                resources: resource_names(artifact),
                error: None,
                workspace: Some(dir.display().to_string()),
            });
        }

        let init = run_command(
            &self.binary,
            &["init", "-input=false", "-no-color"],
            &dir,
            self.timeout_s,
        )
        .await?;
        if init.code != 0 {
            return Ok(Self::failed(&dir, "init", &init));
        }

        let apply = run_command(
            &self.binary,
            &["apply", "-auto-approve", "-input=false", "-no-color"],
            &dir,
            self.timeout_s,
        )
        .await?;
        if apply.code != 0 {
            return Ok(Self::failed(&dir, "apply", &apply));
        }

        write_atomic(&applied_marker, hash.as_bytes()).await?;
        Ok(DeploymentReport {
            success: true,
            resources: resource_names(artifact),
            error: None,
            workspace: Some(dir.display().to_string()),
        })
    }
}
