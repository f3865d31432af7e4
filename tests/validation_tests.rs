//! Input validation tests: hook lists, dependency files, configuration.
//!
//! Everything here goes through the public API; no commands are executed.

mod helpers;

use helpers::TestEnv;
use pibake::config::Config;
use pibake::deps::{parse_dependency_list, DepIntent, DependencyRef, DependencySet};
use pibake::error::{exit_code_for, BuildError};
use pibake::hooks::parse::format_record;
use pibake::hooks::{parse_hook_list, parse_hook_reference, HookSource};
use pibake::pipeline::validate::{settle, validate};
use pibake::pipeline::FixedAnswer;
use pibake::session::{BuildMode, Secret};
use serial_test::serial;
use std::collections::HashMap;
use std::time::Duration;

// =============================================================================
// Hook lists
// =============================================================================

#[test]
fn test_hook_list_mixes_simple_and_parameterized() {
    let env = TestEnv::new();
    env.script("hooks/i2c.sh", "true");
    env.script("hooks/app.sh", "true");
    let list = env.write(
        "hooks.txt",
        "# enable peripherals first\n\
         hooks/i2c.sh\n\
         \n\
         hooks/app.sh|https://example.com/org/app.git|v1.2|/opt|cmake, libssl-dev\n",
    );

    let mut hooks = Vec::new();
    let added = parse_hook_list(&list, &mut hooks).unwrap();
    assert_eq!(added, 2);

    assert!(!hooks[0].is_parameterized());
    assert_eq!(hooks[0].name(), "i2c");
    assert_eq!(hooks[0].script, env.base_dir.join("hooks/i2c.sh"));

    let params = hooks[1].params.as_ref().unwrap();
    assert_eq!(hooks[1].name(), "app");
    assert_eq!(
        params.source,
        HookSource::Remote("https://example.com/org/app.git".to_string())
    );
    assert_eq!(params.revision, "v1.2");
    assert_eq!(params.dependencies(), vec!["cmake", "libssl-dev"]);
    assert_eq!(params.post_install, None);
}

#[test]
fn test_post_install_keeps_pipes() {
    let env = TestEnv::new();
    env.script("build.sh", "true");
    let list = env.write(
        "hooks.txt",
        "build.sh|https://example.com/tool.git||/opt||make | tee /tmp/log\n",
    );

    let mut hooks = Vec::new();
    parse_hook_list(&list, &mut hooks).unwrap();
    let params = hooks[0].params.as_ref().unwrap();
    assert_eq!(params.post_install.as_deref(), Some("make | tee /tmp/log"));
}

#[test]
fn test_malformed_hook_line_reports_location() {
    let env = TestEnv::new();
    env.script("a.sh", "true");
    let list = env.write("hooks.txt", "a.sh\na.sh|https://example.com/x.git|v1\n");

    let mut hooks = Vec::new();
    let err = parse_hook_list(&list, &mut hooks).unwrap_err();
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MalformedHookLine { line, fields, .. }) => {
            assert_eq!(*line, 2);
            assert_eq!(*fields, 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(exit_code_for(&err), 2);
}

#[test]
fn test_missing_hook_script() {
    let env = TestEnv::new();
    let list = env.write("hooks.txt", "hooks/ghost.sh\n");

    let mut hooks = Vec::new();
    let err = parse_hook_list(&list, &mut hooks).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::HookScriptNotFound { line: 1, .. })
    ));
}

#[test]
fn test_missing_hook_list() {
    let env = TestEnv::new();
    let mut hooks = Vec::new();
    let err = parse_hook_list(&env.base_dir.join("nope.txt"), &mut hooks).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::ConfigNotFound(_))
    ));
}

#[test]
fn test_inline_reference_and_record_rendering() {
    let env = TestEnv::new();
    env.script("tool.sh", "true");

    let hook = parse_hook_reference("tool.sh|file:///srv/tool|ignored|/opt|git", &env.base_dir)
        .unwrap();
    let params = hook.params.as_ref().unwrap();
    assert_eq!(params.source, HookSource::Local("/srv/tool".into()));
    assert_eq!(hook.name(), "tool");
    assert!(format_record(&hook).contains("file:///srv/tool"));
}

// =============================================================================
// Dependency files
// =============================================================================

#[test]
fn test_dependency_list_keeps_inline_comments_verbatim() {
    let packages = parse_dependency_list("# header\n\ngit # vcs\n  curl  \n");
    assert_eq!(packages, vec!["git # vcs", "curl"]);
}

#[test]
fn test_dependency_none_sentinel() {
    assert!(DependencyRef::parse("none").is_disabled());
    let set = DependencySet::load("runtime", DepIntent::Runtime, DependencyRef::parse("none"))
        .unwrap();
    assert!(!set.is_enabled());
    assert!(set.is_empty());
}

#[test]
fn test_missing_dependency_file() {
    let env = TestEnv::new();
    let err = DependencySet::load(
        "build",
        DepIntent::InstallThenPurge,
        DependencyRef::File(env.base_dir.join("missing.txt")),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::ConfigNotFound(_))
    ));
}

// =============================================================================
// Session validation
// =============================================================================

#[test]
fn test_incremental_without_work_is_confirmed() {
    let env = TestEnv::new();
    let session = env.session(BuildMode::Incremental);

    let validation = validate(&session).unwrap();
    assert_eq!(validation.confirmations.len(), 1);
    settle(&validation, &FixedAnswer(true)).unwrap();

    let err = settle(&validation, &FixedAnswer(false)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::ConfirmationDeclined(_))
    ));
}

#[test]
fn test_base_ignores_incremental_options_with_warnings() {
    let env = TestEnv::new();
    let mut session = env.session(BuildMode::Base);
    session.password = Some(Secret::new("pw"));
    session.keep_build_deps = true;
    session.post_build_script = Some(env.script("post.sh", "true"));

    let validation = validate(&session).unwrap();
    assert!(validation.confirmations.is_empty());
    assert!(validation.warnings.len() >= 2);
}

#[test]
fn test_unsupported_image_format() {
    let env = TestEnv::new();
    let mut session = env.session(BuildMode::Base);
    session.source_image = env.write("raspios.img.gz", "");
    session.password = Some(Secret::new("pw"));

    let err = validate(&session).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::UnsupportedImageFormat(_))
    ));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_defaults() {
    let config = Config::from_vars(HashMap::new());
    assert_eq!(config.qemu_binary.to_str(), Some("/usr/bin/qemu-aarch64-static"));
    assert_eq!(config.emulator_name(), "qemu-aarch64-static");
    assert_eq!(config.pi_user, "pi");
    assert_eq!(config.partition_wait_attempts, 10);
    assert_eq!(config.default_mode, BuildMode::Base);
}

#[test]
fn test_config_bad_values_fall_back() {
    let vars: HashMap<String, String> = [
        ("PIBAKE_PARTITION_WAIT_ATTEMPTS", "0"),
        ("PIBAKE_PARTITION_WAIT_MS", "soon"),
        ("PIBAKE_MODE", "turbo"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let config = Config::from_vars(vars);
    assert_eq!(config.partition_wait_attempts, 1);
    assert_eq!(config.partition_wait_interval, Duration::from_millis(1000));
    assert_eq!(config.default_mode, BuildMode::Base);
}

#[test]
#[serial]
fn test_config_from_process_env() {
    std::env::set_var("PIBAKE_MODE", "incremental");
    std::env::set_var("PIBAKE_SDM", "/opt/sdm/sdm");
    let config = Config::from_env();
    std::env::remove_var("PIBAKE_MODE");
    std::env::remove_var("PIBAKE_SDM");

    assert_eq!(config.default_mode, BuildMode::Incremental);
    assert_eq!(config.sdm, "/opt/sdm/sdm");
}

#[test]
#[serial]
fn test_config_env_unset_uses_defaults() {
    std::env::remove_var("PIBAKE_SDM");
    let config = Config::from_env();
    assert_eq!(config.sdm, "sdm");
}
