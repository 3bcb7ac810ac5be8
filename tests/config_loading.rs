use std::io::Write;
use std::sync::Arc;
use xr_frame_pacer::vr::runtime::ReferenceSpace;
use xr_frame_pacer::vr::{BlendMode, SessionState, SimulatedRuntime};
use xr_frame_pacer::{ConfigError, SessionConfig, XrPlatform};

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write config");
    file.flush().expect("flush config");
    file
}

#[test]
fn loads_a_config_file() {
    let file = write_config(
        r#"{
            "application_name": "pacer-test",
            "blend_mode": "alpha_blend",
            "base_space": "stage",
            "swapchain_formats": [43],
            "image_wait_timeout_ms": 12,
            "actions": ["a_click", "left_grip_pose"]
        }"#,
    );
    let config = SessionConfig::from_path(file.path()).expect("config");
    assert_eq!(config.application_name, "pacer-test");
    assert_eq!(config.blend_mode, BlendMode::AlphaBlend);
    assert_eq!(config.base_space, ReferenceSpace::Stage);
    assert_eq!(config.swapchain_formats, vec![43]);
    assert_eq!(config.image_wait_timeout().as_millis(), 12);
    assert_eq!(config.bindings().len(), 2);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.json");
    let err = SessionConfig::from_path(&path).expect_err("missing file");
    match err {
        ConfigError::Io { path: reported, .. } => assert!(reported.ends_with("absent.json")),
        other => panic!("expected io error, got {other}"),
    }
}

#[test]
fn invalid_file_is_rejected() {
    let file = write_config(r#"{ "sample_count": 0 }"#);
    assert!(matches!(
        SessionConfig::from_path(file.path()),
        Err(ConfigError::Invalid(_))
    ));

    let file = write_config("not json");
    assert!(matches!(
        SessionConfig::from_path(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn platform_refuses_an_invalid_config() {
    let runtime = Arc::new(SimulatedRuntime::new());
    let config = SessionConfig {
        swapchain_formats: Vec::new(),
        ..SessionConfig::default()
    };
    assert!(XrPlatform::initialize(runtime, config).is_err());
}

#[test]
fn stage_base_space_is_used_for_submissions() {
    let file = write_config(r#"{ "base_space": "stage", "blend_mode": "additive" }"#);
    let config = SessionConfig::from_path(file.path()).expect("config");

    let runtime = Arc::new(SimulatedRuntime::new());
    runtime.set_should_render(false);
    let platform = XrPlatform::initialize(runtime.clone(), config).expect("platform");
    let session = platform.create_session().expect("session");
    runtime.push_state(SessionState::Ready);
    platform.poll_events().expect("poll");

    session.begin_frame().expect("begin");
    session.end_frame().expect("end");

    let spaces = session.spaces();
    assert_eq!(spaces.base, spaces.stage);
    let submissions = runtime.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].space, spaces.stage);
    assert_eq!(submissions[0].blend_mode, BlendMode::Additive);
}
