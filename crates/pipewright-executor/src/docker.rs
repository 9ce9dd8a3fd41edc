//! Local Docker job runtime.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use pipewright_core::execution::JobData;
use pipewright_core::runtime::{JobOutcome, JobRuntime};
use pipewright_core::{Error, ResourceId, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a job's repository is cloned inside the container.
const WORKSPACE_DIR: &str = "/workspace";

/// Runs each job in a fresh container on the local Docker daemon.
pub struct DockerJobRuntime {
    docker: Docker,
}

impl DockerJobRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(job_execution_id: &ResourceId) -> String {
        format!("pipewright-job-{}", job_execution_id)
    }

    async fn pull_image(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        // A failed pull is not fatal: the image may already be present locally.
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "Pull warning");
                }
            }
        }
    }

    async fn start_container(&self, job: &JobData, container_name: &str) -> Result<()> {
        // Leftover from an earlier attempt of the same execution.
        self.remove_container(container_name).await.ok();

        let mut env = vec![
            "CI=true".to_string(),
            format!("PIPEWRIGHT_PIPELINE={}", job.pipeline_name),
            format!("PIPEWRIGHT_STAGE={}", job.stage_name),
            format!("PIPEWRIGHT_JOB={}", job.job_name),
            format!("PIPEWRIGHT_JOB_EXECUTION_ID={}", job.job_execution_id),
        ];
        env.extend(checkout_env(job));

        let working_dir = if job.repository.is_some() {
            None
        } else {
            job.working_dir.clone()
        };

        let config = Config {
            image: Some(job.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), build_script(job)]),
            env: Some(env),
            working_dir,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.to_string(),
            platform: None,
        };

        info!(container = %container_name, "Creating container");
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        self.docker
            .start_container(container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))?;

        Ok(())
    }

    /// Forward container output to tracing until the container stops.
    fn forward_logs(&self, job: &JobData, container_name: &str) -> JoinHandle<()> {
        let docker = self.docker.clone();
        let container_name = container_name.to_string();
        let job_execution_id = job.job_execution_id;
        let job_name = job.job_name.clone();

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut stream = docker.logs(&container_name, Some(options));

            while let Some(result) = stream.next().await {
                let (stream_name, message) = match result {
                    Ok(LogOutput::StdErr { message }) => ("stderr", message),
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::Console { message })
                    | Ok(LogOutput::StdIn { message }) => ("stdout", message),
                    Err(e) => {
                        warn!(error = %e, "Log stream error");
                        break;
                    }
                };
                for line in String::from_utf8_lossy(&message).lines() {
                    info!(
                        job_execution_id = %job_execution_id,
                        job = %job_name,
                        stream = stream_name,
                        "{}",
                        line
                    );
                }
            }
        })
    }

    async fn wait_for_exit(&self, container_name: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_name, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits are reported as errors by the wait endpoint.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::ExecutionFailed(format!(
                "Failed to wait for container: {}",
                e
            ))),
            None => Err(Error::ExecutionFailed(
                "Container wait ended without an exit status".to_string(),
            )),
        }
    }

    async fn remove_container(&self, container_name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_name, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))
    }
}

#[async_trait]
impl JobRuntime for DockerJobRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn execute(&self, job: &JobData, cancel: CancellationToken) -> Result<JobOutcome> {
        if job.script.is_empty() {
            return Err(Error::InvalidInput(format!(
                "job {} has no script",
                job.job_name
            )));
        }

        tokio::select! {
            _ = self.pull_image(&job.image) => {}
            _ = cancel.cancelled() => return Ok(JobOutcome::Cancelled),
        }

        let container_name = Self::container_name(&job.job_execution_id);
        self.start_container(job, &container_name).await?;
        let log_handle = self.forward_logs(job, &container_name);

        let outcome = tokio::select! {
            exit = self.wait_for_exit(&container_name) => match exit {
                Ok(0) => Ok(JobOutcome::Succeeded),
                Ok(code) => Ok(JobOutcome::Failed {
                    exit_code: i32::try_from(code).ok(),
                    message: String::new(),
                }),
                Err(e) => Err(e),
            },
            _ = cancel.cancelled() => {
                info!(container = %container_name, "Stopping cancelled job container");
                if let Err(e) = self.docker.stop_container(&container_name, None).await {
                    warn!(container = %container_name, error = %e, "Failed to stop container");
                }
                Ok(JobOutcome::Cancelled)
            }
        };

        log_handle.abort();
        let _ = log_handle.await;

        if let Err(e) = self.remove_container(&container_name).await {
            warn!(container = %container_name, error = %e, "Failed to remove container");
        }

        outcome
    }
}

/// Checkout parameters, passed as environment variables so the shell never
/// parses their values.
fn checkout_env(job: &JobData) -> Vec<String> {
    let mut env = Vec::new();
    if let Some(repo) = &job.repository {
        env.push(format!("PIPEWRIGHT_REPO_URL={}", repo.url));
        if let Some(branch) = &repo.branch {
            env.push(format!("PIPEWRIGHT_GIT_BRANCH={}", branch));
        }
        if let Some(commit) = &repo.commit {
            env.push(format!("PIPEWRIGHT_GIT_COMMIT={}", commit));
        }
        if let Some(dir) = &job.working_dir {
            env.push(format!("PIPEWRIGHT_WORKING_DIR={}", dir));
        }
    }
    env
}

/// Shell script run by the container: optional checkout, then the job's
/// commands, stopping at the first failure. Checkout values are referenced
/// through the variables set by `checkout_env`.
fn build_script(job: &JobData) -> String {
    let mut steps = Vec::new();

    if let Some(repo) = &job.repository {
        let branch_arg = if repo.branch.is_some() {
            " -b \"$PIPEWRIGHT_GIT_BRANCH\""
        } else {
            ""
        };
        steps.push(format!(
            "git clone{} -- \"$PIPEWRIGHT_REPO_URL\" {}",
            branch_arg, WORKSPACE_DIR
        ));
        steps.push(format!("cd {}", WORKSPACE_DIR));
        if repo.commit.is_some() {
            steps.push("git checkout \"$PIPEWRIGHT_GIT_COMMIT\"".to_string());
        }
        if job.working_dir.is_some() {
            steps.push("cd \"$PIPEWRIGHT_WORKING_DIR\"".to_string());
        }
    }

    steps.extend(job.script.iter().cloned());
    steps.join(" && ")
}
