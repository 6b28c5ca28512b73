use serde::{Deserialize, Serialize};

/// kiln.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub stack: StackSection,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackSection {
    /// Stack name. Required unless `kiln template --stack` supplies one.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Requested memory in MiB (snapped to a valid Fargate size)
    #[serde(default = "default_memory_mib")]
    pub memory_mib: f64,
    /// Requested vCPU count (snapped to a valid Fargate size)
    #[serde(default = "default_vcpu")]
    pub vcpu: f64,
    /// Run on FARGATE_SPOT instead of FARGATE
    #[serde(default)]
    pub spot: bool,
    /// CPU architecture override, e.g. `ARM64` or `X86_64`
    #[serde(default)]
    pub cpu_architecture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build context directory, relative to the project root
    #[serde(default = "default_context")]
    pub context: String,
    /// Dockerfile path relative to the build context (defaults to `Dockerfile`)
    #[serde(default)]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Whether the stack owns its VPC, subnet, and routing
    #[serde(default = "default_true")]
    pub create: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            memory_mib: default_memory_mib(),
            vcpu: default_vcpu(),
            spot: false,
            cpu_architecture: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            create: default_true(),
        }
    }
}

impl KilnConfig {
    /// Load from kiln.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &std::path::Path) -> crate::Result<Self> {
        let config_path = project_dir.join("kiln.toml");
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            tracing::debug!(path = %config_path.display(), "no kiln.toml; using defaults");
            Ok(Self::default())
        }
    }

    /// Combine the `[task]` section with a stack name and a built image
    /// into the input for template synthesis.
    pub fn stack_config(&self, stack_name: &str, image: &str) -> crate::Result<StackConfig> {
        StackConfig::new(
            stack_name,
            image,
            self.task.memory_mib,
            self.task.vcpu,
            self.task.spot,
            self.task.cpu_architecture.clone(),
        )
    }
}

/// Parameters for one synthesis call. Built per deployment request and
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub stack_name: String,
    pub image: String,
    pub memory_mib: f64,
    pub vcpu: f64,
    pub spot: bool,
    pub cpu_architecture: Option<String>,
}

impl StackConfig {
    pub fn new(
        stack_name: &str,
        image: &str,
        memory_mib: f64,
        vcpu: f64,
        spot: bool,
        cpu_architecture: Option<String>,
    ) -> crate::Result<Self> {
        if stack_name.trim().is_empty() {
            return Err(crate::Error::InvalidStack {
                reason: "stack name must not be empty".to_owned(),
            });
        }
        if image.trim().is_empty() {
            return Err(crate::Error::InvalidStack {
                reason: "image reference must not be empty".to_owned(),
            });
        }
        if !(vcpu.is_finite() && vcpu > 0.0) {
            return Err(crate::Error::InvalidStack {
                reason: format!("vcpu must be a positive number, got {vcpu}"),
            });
        }
        if !(memory_mib.is_finite() && memory_mib > 0.0) {
            return Err(crate::Error::InvalidStack {
                reason: format!("memory must be a positive number of MiB, got {memory_mib}"),
            });
        }

        Ok(Self {
            stack_name: stack_name.to_owned(),
            image: image.to_owned(),
            memory_mib,
            vcpu,
            spot,
            cpu_architecture: cpu_architecture.filter(|a| !a.trim().is_empty()),
        })
    }
}

fn default_memory_mib() -> f64 {
    512.0
}

fn default_vcpu() -> f64 {
    0.25
}

fn default_context() -> String {
    ".".to_owned()
}

fn default_true() -> bool {
    true
}
