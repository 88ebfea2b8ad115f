// Unit tests for business rules

use super::*;

fn descriptor(file_name: &str, size_bytes: u64, duration_secs: Option<f64>) -> SourceDescriptor<'_> {
    SourceDescriptor {
        file_name,
        size_bytes,
        duration_secs,
    }
}

#[test]
fn test_accepts_mp4_files() {
    let validator = InputValidator::default();
    let report = validator.validate(&descriptor("test.mp4", 1024, Some(20.0)));
    assert!(report.is_valid(), "{:?}", report.errors);
}

#[test]
fn test_extension_check_is_case_insensitive() {
    let validator = InputValidator::default();
    assert!(validator.validate(&descriptor("test.MP4", 1024, None)).is_valid());
}

#[test]
fn test_rejects_mov_files() {
    let validator = InputValidator::default();
    let report = validator.validate(&descriptor("clip.mov", 1024, None));
    assert!(!report.is_valid());
    assert!(report.errors.contains(&"File must be in .mp4 format".to_string()));
}

#[test]
fn test_rejects_files_without_extension() {
    let validator = InputValidator::default();
    assert!(!validator.validate(&descriptor("testvideo", 1024, None)).is_valid());
}

#[test]
fn test_rejects_oversized_files() {
    let validator = InputValidator::default();
    let report = validator.validate(&descriptor("big.mp4", 600 * 1024 * 1024, None));
    assert!(!report.is_valid());
    assert!(report.errors[0].contains("500 MiB"), "{:?}", report.errors);
}

#[test]
fn test_size_cap_is_inclusive() {
    let validator = InputValidator::default();
    assert!(validator
        .validate(&descriptor("edge.mp4", 500 * 1024 * 1024, None))
        .is_valid());
}

#[test]
fn test_rejects_empty_files() {
    let validator = InputValidator::default();
    let report = validator.validate(&descriptor("empty.mp4", 0, None));
    assert_eq!(report.errors, vec!["File is empty".to_string()]);
}

#[test]
fn test_duration_bounds() {
    let validator = InputValidator::default();

    assert!(validator.duration_problem(15.0).is_none());
    assert!(validator.duration_problem(30.0).is_none());
    assert_eq!(
        validator.duration_problem(14.9).unwrap(),
        "Video must be at least 15 seconds long"
    );
    assert_eq!(
        validator.duration_problem(30.5).unwrap(),
        "Video must not exceed 30 seconds"
    );
    assert!(validator.duration_problem(f64::NAN).is_some());
}

#[test]
fn test_collects_every_problem() {
    let validator = InputValidator::default();
    let report = validator.validate(&descriptor("clip.avi", 700 * 1024 * 1024, Some(5.0)));
    assert_eq!(report.errors.len(), 3);
}

#[test]
fn test_custom_policy() {
    let validator = InputValidator::new(ValidationPolicy {
        max_file_size_bytes: 10,
        min_duration_secs: 1.0,
        max_duration_secs: 2.0,
        allowed_extensions: vec![".mp4".to_string(), ".m4v".to_string()],
    });

    assert!(validator.validate(&descriptor("a.m4v", 10, Some(1.5))).is_valid());
    assert!(!validator.validate(&descriptor("a.m4v", 11, Some(1.5))).is_valid());
}

#[test]
fn test_stage_plan() {
    assert_eq!(
        StagePlan::encoder_stages(true),
        vec![Stage::Scaling, Stage::AddingAudio, Stage::Finalizing]
    );
    assert_eq!(
        StagePlan::encoder_stages(false),
        vec![Stage::Scaling, Stage::Finalizing]
    );
}

#[test]
fn test_stage_timeout_scales_with_input() {
    let policy = StageTimeoutPolicy {
        base: Duration::from_secs(60),
        per_mib: Duration::from_secs(2),
    };

    assert_eq!(policy.timeout_for(0), Duration::from_secs(60));
    assert_eq!(policy.timeout_for(1), Duration::from_secs(62));
    assert_eq!(policy.timeout_for(10 * 1024 * 1024), Duration::from_secs(80));
}
