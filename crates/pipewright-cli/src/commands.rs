//! CLI command implementations.

use anyhow::Result;
use pipewright_core::report::PipelineStatusReport;
use std::fmt::Write;

use crate::client::ApiClient;

pub async fn status(client: &ApiClient, pipeline: &str, run: Option<&str>) -> Result<()> {
    let report = client.pipeline_status(pipeline, run).await?;
    print!("{}", render_report(&report));
    Ok(())
}

pub async fn jobs(client: &ApiClient) -> Result<()> {
    let jobs = client.active_jobs().await?;
    println!("{} active job(s)", jobs.active_job_count);
    for id in jobs.active_job_ids {
        println!("  {}", id);
    }
    Ok(())
}

pub async fn cancel(client: &ApiClient, id: &str) -> Result<()> {
    if client.cancel_job(id).await? {
        println!("Cancelled job execution {}", id);
    } else {
        println!("Job execution {} is not running", id);
    }
    Ok(())
}

pub async fn enqueue(client: &ApiClient, id: &str) -> Result<()> {
    let message_id = client.enqueue_job(id).await?;
    println!("Enqueued job execution {} (message {})", id, message_id);
    Ok(())
}

pub fn validate(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    match pipewright_config::system::parse_system_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  server bind:        {}", config.server.bind);
            println!("  worker id:          {}", config.worker.id);
            println!("  worker concurrency: {}", config.worker.concurrency);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Indented pipeline / stage / job tree.
fn render_report(report: &PipelineStatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} (run {})",
        report.pipeline_name, report.pipeline_status, report.pipeline_execution_id
    );
    for stage in &report.stages {
        let _ = writeln!(out, "  {} {}", stage.stage_name, stage.stage_status);
        for job in &stage.jobs {
            let _ = writeln!(out, "    {} {}", job.job_name, job.job_status);
        }
    }
    out
}
