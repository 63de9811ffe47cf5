//! WfCommons trace ingestion
//!
//! Parses workflow traces in the WfCommons JSON schema
//! (<https://github.com/wfcommons/workflow-schema>) into [`Workflow`]
//! instances with dense, topologically ordered task ids.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{SimResult, SimulatorError};
use crate::workflow::{File, TaskId, Workflow, WorkflowConstraint};

#[derive(Debug, Deserialize)]
struct TraceDocument {
    name: String,
    #[serde(default)]
    description: String,
    workflow: TraceWorkflow,
}

#[derive(Debug, Deserialize)]
struct TraceWorkflow {
    container: TraceContainer,
    jobs: Vec<TraceJob>,
}

#[derive(Debug, Deserialize)]
struct TraceContainer {
    provision_time: u64,
}

#[derive(Debug, Deserialize)]
struct TraceJob {
    name: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    files: Vec<TraceFile>,
    runtime: f64,
    cores: u32,
}

#[derive(Debug, Deserialize)]
struct TraceFile {
    name: String,
    size: u64,
    link: String,
}

/// Parser for WfCommons workflow traces.
///
/// Task ids are assigned `0..N-1` in file order; every job must appear after
/// all of its parents or ingestion fails with a trace error.
#[derive(Debug, Default)]
pub struct TraceParser {
    container_provision_override: Option<u64>,
}

impl TraceParser {
    /// Create a parser using the container provisioning time from the trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the container provisioning time from the trace
    pub fn with_container_provision(mut self, provision_time_s: u64) -> Self {
        self.container_provision_override = Some(provision_time_s);
        self
    }

    /// Parse a trace file into a workflow carrying the given constraint
    pub fn parse_file(
        &self,
        path: impl AsRef<Path>,
        constraint: WorkflowConstraint,
    ) -> SimResult<Workflow> {
        let content = std::fs::read_to_string(path)?;
        self.parse_str(&content, constraint)
    }

    /// Parse a trace document from a JSON string
    pub fn parse_str(&self, json: &str, constraint: WorkflowConstraint) -> SimResult<Workflow> {
        let doc: TraceDocument = serde_json::from_str(json)?;

        let mut workflow = Workflow::new(doc.name, doc.description, constraint);
        let provision_time = self
            .container_provision_override
            .unwrap_or(doc.workflow.container.provision_time);
        workflow.set_container(provision_time)?;

        // Jobs reference parents by name; ids exist only for jobs already seen,
        // which is exactly the topological-order guarantee.
        let mut ids_by_name: HashMap<String, TaskId> = HashMap::new();

        for job in doc.workflow.jobs {
            let mut parents = Vec::with_capacity(job.parents.len());
            for parent_name in &job.parents {
                let parent = ids_by_name.get(parent_name).copied().ok_or_else(|| {
                    SimulatorError::BadTrace(format!(
                        "job '{}' is listed before its parent '{}'",
                        job.name, parent_name
                    ))
                })?;
                parents.push(parent);
            }

            let mut input_files = Vec::new();
            let mut output_files = Vec::new();
            for file in &job.files {
                let f = File::new(file.name.clone(), file.size);
                match file.link.as_str() {
                    "input" => input_files.push(f),
                    "output" => output_files.push(f),
                    other => {
                        return Err(SimulatorError::BadTrace(format!(
                            "job '{}': unknown file link '{}'",
                            job.name, other
                        )))
                    }
                }
            }

            if job.cores == 0 {
                return Err(SimulatorError::BadTrace(format!(
                    "job '{}' declares zero cores",
                    job.name
                )));
            }
            let runtime_s = job.runtime / job.cores as f64;

            let id = workflow.add_task(
                job.name.clone(),
                parents,
                input_files,
                output_files,
                runtime_s,
            )?;
            ids_by_name.insert(job.name, id);
        }

        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"{
        "name": "1000genome",
        "description": "chameleon 2ch",
        "workflow": {
            "container": {"provision_time": 60},
            "jobs": [
                {
                    "name": "individuals_0",
                    "parents": [],
                    "files": [
                        {"name": "chr21.vcf", "size": 250, "link": "input"},
                        {"name": "chunk_0", "size": 125, "link": "output"}
                    ],
                    "runtime": 100.0,
                    "cores": 4
                },
                {
                    "name": "merge_0",
                    "parents": ["individuals_0"],
                    "files": [
                        {"name": "chunk_0", "size": 125, "link": "input"}
                    ],
                    "runtime": 30.0,
                    "cores": 1
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_trace() {
        let wf = TraceParser::new()
            .parse_str(TRACE, WorkflowConstraint::Budget(5.0))
            .unwrap();

        assert_eq!(wf.name, "1000genome");
        assert_eq!(wf.tasks.len(), 2);
        assert_eq!(wf.container.provision_time_s, 60);
        // runtime normalized per core
        assert_eq!(wf.tasks[0].runtime_s, 25.0);
        assert_eq!(wf.tasks[1].runtime_s, 30.0);
        assert_eq!(wf.tasks[1].parents, vec![0]);
        assert_eq!(wf.tasks[0].output_files[0].name, "chunk_0");
        assert_eq!(wf.tasks[1].input_files[0].size_kb, 125);
    }

    #[test]
    fn test_container_provision_override() {
        let wf = TraceParser::new()
            .with_container_provision(300)
            .parse_str(TRACE, WorkflowConstraint::Budget(5.0))
            .unwrap();
        assert_eq!(wf.container.provision_time_s, 300);
        assert_eq!(wf.tasks[0].container.provision_time_s, 300);
    }

    #[test]
    fn test_child_before_parent_rejected() {
        let bad = TRACE.replace("\"parents\": [],", "\"parents\": [\"merge_0\"],");
        let err = TraceParser::new().parse_str(&bad, WorkflowConstraint::Budget(5.0));
        assert!(matches!(err, Err(SimulatorError::BadTrace(_))));
    }
}
