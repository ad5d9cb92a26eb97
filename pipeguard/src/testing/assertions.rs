//! Test assertions for pipeline runs.

use crate::core::{RunStatus, StageClassification};
use crate::pipeline::PipelineRun;

/// Asserts the ordered (stage, classification) list of a run.
pub fn assert_classifications(run: &PipelineRun, expected: &[(&str, StageClassification)]) {
    let actual = run.classifications();
    assert_eq!(
        actual.as_slice(),
        expected,
        "Unexpected classifications for run {}",
        run.run_id
    );
}

/// Asserts the overall status of a run.
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run status {expected}, got {} (error: {:?})",
        run.status, run.error
    );
}

/// Asserts the classification of a single stage.
pub fn assert_stage(run: &PipelineRun, stage: &str, expected: StageClassification) {
    let result = run.result(stage);
    assert!(result.is_some(), "No result for stage '{stage}'");
    if let Some(result) = result {
        assert_eq!(
            result.classification, expected,
            "Stage '{stage}' was {} (note: {:?})",
            result.classification, result.note
        );
    }
}
