use std::io::Write;

use edgecam::{Backend, Config};

#[test]
fn defaults_without_file() {
    let config = Config::default();
    assert_eq!(config.capture.device, "/dev/video0");
    assert_eq!(config.capture.resolution_index, 3);
    assert_eq!(config.capture.codec_index, 0);
    assert_eq!(config.loopback.device, "/dev/video10");
    assert_eq!(config.processing.backend, Backend::Gpu);
    assert!(!config.processing.enabled);
    assert_eq!(config.pipeline.report_interval, 20);
}

#[test]
fn toml_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[capture]
device = "/dev/video4"
resolution_index = 1
auto_focus = false

[processing]
backend = "cpu"
enabled = true
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.capture.device, "/dev/video4");
    assert_eq!(config.capture.resolution_index, 1);
    assert!(!config.capture.auto_focus);
    assert_eq!(config.processing.backend, Backend::Cpu);
    assert!(config.processing.enabled);

    // Untouched keys keep their defaults
    assert_eq!(config.capture.exposure, 150);
    assert_eq!(config.loopback.device, "/dev/video10");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[pipeline]\nfocus_step = 2").unwrap();

    // Only this test touches the environment, and only this key.
    std::env::set_var("EDGECAM_PIPELINE__FOCUS_STEP", "7");
    let config = Config::load(Some(file.path()));
    std::env::remove_var("EDGECAM_PIPELINE__FOCUS_STEP");

    assert_eq!(config.unwrap().pipeline.focus_step, 7);
}

#[test]
fn poll_timeout_is_never_zero() {
    let mut config = Config::default();
    config.pipeline.poll_timeout_ms = 0;
    assert_eq!(config.pipeline.poll_timeout().as_millis(), 1);
}
