//! Trace and catalog ingestion against real files on disk

use std::io::Write;

use cwsim::{load_catalog_file, SimTime, TraceParser, SimulatorError, WorkflowConstraint};

const TRACE: &str = r#"{
    "name": "epigenomics",
    "description": "synthetic epigenomics run",
    "workflow": {
        "container": {"provision_time": 120},
        "jobs": [
            {
                "name": "fastqSplit_0",
                "parents": [],
                "files": [
                    {"name": "reads.fastq", "size": 125000, "link": "input"},
                    {"name": "split_0", "size": 62500, "link": "output"},
                    {"name": "split_1", "size": 62500, "link": "output"}
                ],
                "runtime": 240.0,
                "cores": 2
            },
            {
                "name": "filterContams_0",
                "parents": ["fastqSplit_0"],
                "files": [
                    {"name": "split_0", "size": 62500, "link": "input"},
                    {"name": "filtered_0", "size": 50000, "link": "output"}
                ],
                "runtime": 180.0,
                "cores": 1
            },
            {
                "name": "filterContams_1",
                "parents": ["fastqSplit_0"],
                "files": [
                    {"name": "split_1", "size": 62500, "link": "input"},
                    {"name": "filtered_1", "size": 50000, "link": "output"}
                ],
                "runtime": 180.0,
                "cores": 1
            }
        ]
    }
}"#;

#[test]
fn test_parse_trace_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TRACE.as_bytes()).unwrap();

    let wf = TraceParser::new()
        .parse_file(
            file.path(),
            WorkflowConstraint::Deadline(SimTime::from_secs(10_000.0)),
        )
        .unwrap();

    assert_eq!(wf.name, "epigenomics");
    assert_eq!(wf.tasks.len(), 3);
    assert_eq!(wf.container.provision_time_s, 120);

    // Ids follow file order; parents resolve by name.
    assert_eq!(wf.tasks[0].name, "fastqSplit_0");
    assert!(wf.tasks[0].parents.is_empty());
    assert_eq!(wf.tasks[1].parents, vec![0]);
    assert_eq!(wf.tasks[2].parents, vec![0]);
    assert_eq!(wf.children(0), &[1, 2]);

    // Runtime is normalized per core.
    assert_eq!(wf.tasks[0].runtime_s, 120.0);
    assert_eq!(wf.tasks[1].runtime_s, 180.0);

    // File links split into inputs and outputs.
    assert_eq!(wf.tasks[0].input_files.len(), 1);
    assert_eq!(wf.tasks[0].output_files.len(), 2);
    assert_eq!(wf.tasks[0].input_files[0].size_in_megabits(), 1000.0);
}

#[test]
fn test_misordered_trace_is_rejected() {
    // The child references a parent that only appears later in the file.
    let bad = r#"{
        "name": "bad",
        "description": "",
        "workflow": {
            "container": {"provision_time": 0},
            "jobs": [
                {"name": "child", "parents": ["parent"], "files": [],
                 "runtime": 10.0, "cores": 1},
                {"name": "parent", "parents": [], "files": [],
                 "runtime": 10.0, "cores": 1}
            ]
        }
    }"#;
    let err = TraceParser::new().parse_str(bad, WorkflowConstraint::Budget(1.0));
    assert!(matches!(err, Err(SimulatorError::BadTrace(_))));
}

#[test]
fn test_load_bundled_catalog() {
    let types = load_catalog_file(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/vms.json")).unwrap();

    // Only enabled entries, ascending by price.
    assert_eq!(types.len(), 4);
    assert!(types.windows(2).all(|w| w[0].price_per_period <= w[1].price_per_period));
    assert_eq!(types[0].name, "m5.large");
    assert!(types.iter().all(|t| t.name != "m5.metal"));
}
