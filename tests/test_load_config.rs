use ado_export::load_config::{load_config, parse_settings};
use ado_export_core::config::{ExportSettings, ProbePolicy};
use std::fs::write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_reads_all_sections() {
    let config_yaml = r#"
enumeration:
  bucket_size: 5000
  probe: after_empty_bucket
  batch_size: 100
passes:
  repositories: false
cleanup:
  max_attempts: 3
  delay_ms: 250
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let settings = load_config(config_file.path()).expect("Settings should load");

    assert_eq!(settings.enumeration.bucket_size, 5000);
    assert_eq!(settings.enumeration.probe, ProbePolicy::AfterEmptyBucket);
    assert_eq!(settings.enumeration.batch_size, 100);
    assert_eq!(settings.enumeration.too_many_results_marker, "VS402337");
    assert!(settings.passes.work_items);
    assert!(settings.passes.pipelines);
    assert!(!settings.passes.repositories);
    assert_eq!(settings.cleanup.max_attempts, 3);
    assert_eq!(settings.cleanup.delay().as_millis(), 250);
}

#[test]
fn test_load_config_empty_file_gives_defaults() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "\n").unwrap();

    assert_eq!(load_config(config_file.path()).unwrap(), ExportSettings::default());
}

#[test]
fn test_load_config_errors_on_missing_file() {
    let err = load_config("/definitely/not/here/settings.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read settings file"));
}

#[test]
fn test_load_config_rejects_invalid_values() {
    let err = parse_settings("enumeration:\n  bucket_size: 0\n").unwrap_err();
    assert!(err.to_string().contains("bucket_size"));

    let err = parse_settings("cleanup:\n  max_attempts: 0\n").unwrap_err();
    assert!(err.to_string().contains("max_attempts"));
}

#[test]
fn test_load_config_rejects_malformed_yaml() {
    let err = parse_settings("enumeration: [unterminated").unwrap_err();
    assert!(err.to_string().contains("Failed to parse settings YAML"));
}
