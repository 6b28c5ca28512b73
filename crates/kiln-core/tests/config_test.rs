use kiln_core::{KilnConfig, StackConfig};
use tempfile::TempDir;

#[test]
fn load_returns_defaults_when_no_config_file() {
    let tmp = TempDir::new().unwrap();
    let config = KilnConfig::load(tmp.path()).unwrap();

    assert!(config.stack.name.is_none());
    assert_eq!(config.task.memory_mib, 512.0);
    assert_eq!(config.task.vcpu, 0.25);
    assert!(!config.task.spot);
    assert!(config.task.cpu_architecture.is_none());
    assert_eq!(config.build.context, ".");
    assert!(config.build.dockerfile.is_none());
    assert!(config.network.create);
}

#[test]
fn load_parses_full_config() {
    let tmp = TempDir::new().unwrap();
    let toml = r#"
[stack]
name = "my-api"

[task]
memory_mib = 2048
vcpu = 1
spot = true
cpu_architecture = "ARM64"

[build]
context = "app"
dockerfile = "docker/Dockerfile.prod"

[network]
create = false
"#;
    std::fs::write(tmp.path().join("kiln.toml"), toml).unwrap();

    let config = KilnConfig::load(tmp.path()).unwrap();

    assert_eq!(config.stack.name.as_deref(), Some("my-api"));
    assert_eq!(config.task.memory_mib, 2048.0);
    assert_eq!(config.task.vcpu, 1.0);
    assert!(config.task.spot);
    assert_eq!(config.task.cpu_architecture.as_deref(), Some("ARM64"));
    assert_eq!(config.build.context, "app");
    assert_eq!(
        config.build.dockerfile.as_deref(),
        Some("docker/Dockerfile.prod")
    );
    assert!(!config.network.create);
}

#[test]
fn load_partial_config_fills_defaults() {
    let tmp = TempDir::new().unwrap();
    let toml = r#"
[task]
spot = true
"#;
    std::fs::write(tmp.path().join("kiln.toml"), toml).unwrap();

    let config = KilnConfig::load(tmp.path()).unwrap();

    assert!(config.task.spot);
    // Defaults preserved
    assert_eq!(config.task.memory_mib, 512.0);
    assert_eq!(config.build.context, ".");
    assert!(config.network.create);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("kiln.toml"), "not valid {{{{ toml").unwrap();

    let result = KilnConfig::load(tmp.path());
    assert!(result.is_err());

    let err = result.unwrap_err().to_string();
    assert!(err.contains("parse"));
}

#[test]
fn load_empty_config_returns_defaults() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("kiln.toml"), "").unwrap();

    let config = KilnConfig::load(tmp.path()).unwrap();
    assert_eq!(config.task.vcpu, 0.25);
}

// ── StackConfig Tests ──

#[test]
fn stack_config_from_task_section() {
    let mut config = KilnConfig::default();
    config.task.spot = true;
    config.task.cpu_architecture = Some("ARM64".to_owned());

    let stack = config.stack_config("web", "nginx:latest").unwrap();

    assert_eq!(stack.stack_name, "web");
    assert_eq!(stack.image, "nginx:latest");
    assert_eq!(stack.memory_mib, 512.0);
    assert_eq!(stack.vcpu, 0.25);
    assert!(stack.spot);
    assert_eq!(stack.cpu_architecture.as_deref(), Some("ARM64"));
}

#[test]
fn stack_config_rejects_empty_name() {
    let err = StackConfig::new("  ", "nginx", 512.0, 0.25, false, None)
        .unwrap_err()
        .to_string();
    assert!(err.contains("stack name"), "got: {err}");
}

#[test]
fn stack_config_rejects_non_positive_sizes() {
    assert!(StackConfig::new("web", "nginx", 0.0, 0.25, false, None).is_err());
    assert!(StackConfig::new("web", "nginx", 512.0, -1.0, false, None).is_err());
    assert!(StackConfig::new("web", "nginx", f64::NAN, 1.0, false, None).is_err());
}

#[test]
fn stack_config_drops_blank_architecture() {
    let stack = StackConfig::new("web", "nginx", 512.0, 0.25, false, Some(String::new())).unwrap();
    assert!(stack.cpu_architecture.is_none());
}
