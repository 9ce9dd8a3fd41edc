//! Status reports produced by aggregation.

use serde::{Deserialize, Serialize};

use crate::{ExecutionStatus, ResourceId};

/// Rolled-up status of a pipeline run, with its stages and jobs in store
/// listing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusReport {
    pub pipeline_name: String,
    pub pipeline_execution_id: ResourceId,
    pub pipeline_status: ExecutionStatus,
    pub stages: Vec<StageStatusReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatusReport {
    pub stage_name: String,
    pub stage_execution_id: ResourceId,
    pub stage_status: ExecutionStatus,
    pub jobs: Vec<JobStatusReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_name: String,
    pub job_execution_id: ResourceId,
    pub job_status: ExecutionStatus,
}

impl PipelineStatusReport {
    pub fn stage(&self, name: &str) -> Option<&StageStatusReport> {
        self.stages.iter().find(|s| s.stage_name == name)
    }
}

impl StageStatusReport {
    pub fn job(&self, name: &str) -> Option<&JobStatusReport> {
        self.jobs.iter().find(|j| j.job_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_shape() {
        let job_execution_id = ResourceId::new();
        let report = PipelineStatusReport {
            pipeline_name: "build".to_string(),
            pipeline_execution_id: ResourceId::new(),
            pipeline_status: ExecutionStatus::Failed,
            stages: vec![StageStatusReport {
                stage_name: "compile".to_string(),
                stage_execution_id: ResourceId::new(),
                stage_status: ExecutionStatus::Failed,
                jobs: vec![JobStatusReport {
                    job_name: "test".to_string(),
                    job_execution_id,
                    job_status: ExecutionStatus::Failed,
                }],
            }],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["pipelineName"], "build");
        assert_eq!(value["pipelineStatus"], "FAILED");
        assert_eq!(value["stages"][0]["stageName"], "compile");
        assert_eq!(value["stages"][0]["jobs"][0]["jobStatus"], "FAILED");
        assert_eq!(
            value["stages"][0]["jobs"][0]["jobExecutionId"],
            job_execution_id.to_string()
        );
    }

    #[test]
    fn test_lookup_helpers() {
        let report = PipelineStatusReport {
            pipeline_name: "build".to_string(),
            pipeline_execution_id: ResourceId::new(),
            pipeline_status: ExecutionStatus::Success,
            stages: vec![StageStatusReport {
                stage_name: "compile".to_string(),
                stage_execution_id: ResourceId::new(),
                stage_status: ExecutionStatus::Success,
                jobs: vec![JobStatusReport {
                    job_name: "lint".to_string(),
                    job_execution_id: ResourceId::new(),
                    job_status: ExecutionStatus::Success,
                }],
            }],
        };

        assert!(report.stage("compile").and_then(|s| s.job("lint")).is_some());
        assert!(report.stage("deploy").is_none());
    }
}
