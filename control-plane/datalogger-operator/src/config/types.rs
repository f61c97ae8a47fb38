use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Fixed delay before a failed pass is retried.
    /// Env: DLO_REQUEUE_SECS
    #[envconfig(from = "DLO_REQUEUE_SECS", default = "30")]
    pub requeue_secs: u64,

    /// Deadline for a single reconcile pass, including every store call.
    /// Env: DLO_PASS_TIMEOUT_SECS
    #[envconfig(from = "DLO_PASS_TIMEOUT_SECS", default = "20")]
    pub pass_timeout_secs: u64,

    #[envconfig(from = "DLO_FIELD_MANAGER", default = "datalogger-operator")]
    pub field_manager: String,

    /// Restrict the DataLogger watch to one namespace; unset watches all.
    #[envconfig(from = "DLO_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(nested)]
    pub workload: WorkloadConfig,

    #[envconfig(nested)]
    pub features: FeaturesConfig,
}

/// Settings for the container rendered into every managed Deployment.
#[derive(Envconfig, Clone, Debug, PartialEq, Eq)]
pub struct WorkloadConfig {
    #[envconfig(from = "DLO_WORKLOAD_IMAGE", default = "kennethreitz/httpbin")]
    pub image: String,
    #[envconfig(from = "DLO_WORKLOAD_CONTAINER", default = "datalogger")]
    pub container_name: String,
    /// Application port exposed by the container
    #[envconfig(from = "DLO_WORKLOAD_PORT", default = "8080")]
    pub app_port: i32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: "kennethreitz/httpbin".into(),
            container_name: "datalogger".into(),
            app_port: 8080,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct FeaturesConfig {
    /// Watch Namespaces and provision tenants from their labels.
    /// Env: DLO_FEATURES_NAMESPACE_CONTROLLER
    #[envconfig(from = "DLO_FEATURES_NAMESPACE_CONTROLLER", default = "true")]
    pub namespace_controller: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            namespace_controller: true,
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_secs: 30,
            pass_timeout_secs: 20,
            field_manager: "datalogger-operator".into(),
            watch_namespace: None,
            workload: WorkloadConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

impl OperatorConfig {
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }
}
