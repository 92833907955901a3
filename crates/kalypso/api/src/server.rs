use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::apis::meta::v1::Condition,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "serving.serving.kalypso.io",
    version = "v1alpha1",
    kind = "KalypsoTritonServer",
    root = "TritonServerCrd",
    status = "TritonServerStatus",
    shortname = "kts",
    namespaced,
    derive = "Default",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.availableReplicas"}"#,
    printcolumn = r#"{
        "name": "application",
        "type": "string",
        "description": "referenced application name",
        "jsonPath": ".spec.applicationRef"
    }"#,
    printcolumn = r#"{
        "name": "phase",
        "type": "string",
        "description": "phase of the triton server",
        "jsonPath": ".status.phase"
    }"#,
    printcolumn = r#"{
        "name": "replicas",
        "type": "integer",
        "description": "desired replicas",
        "jsonPath": ".spec.replicas"
    }"#,
    printcolumn = r#"{
        "name": "available",
        "type": "integer",
        "description": "available replicas",
        "jsonPath": ".status.availableReplicas"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct TritonServerSpec {
    /// Name of a `KalypsoApplication` in the same namespace.
    pub application_ref: String,
    /// Model repository location (e.g. `s3://bucket/models`).
    pub storage_uri: String,
    #[serde(default)]
    pub triton_config: TritonConfigSpec,
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub networking: Option<NetworkingSpec>,
    #[serde(default)]
    pub observability: Option<ObservabilitySpec>,
}

impl TritonServerCrd {
    pub const FINALIZER_NAME: &'static str = "serving.kalypso.io/tritonserver-finalizer";

    pub fn phase(&self) -> Option<TritonServerPhase> {
        self.status.as_ref().and_then(|status| status.phase)
    }
}

impl TritonServerSpec {
    pub const DEFAULT_REPLICAS: i32 = 1;

    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(Self::DEFAULT_REPLICAS)
    }

    pub fn ports(&self) -> Ports {
        let networking = self.networking.clone().unwrap_or_default();
        let defaults = Ports::default();
        Ports {
            http: networking.http_port.unwrap_or(defaults.http),
            grpc: networking.grpc_port.unwrap_or(defaults.grpc),
            metrics: networking.metrics_port.unwrap_or(defaults.metrics),
        }
    }
}

/// Resolved container ports of a server.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ports {
    pub http: i32,
    pub grpc: i32,
    pub metrics: i32,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            http: 8000,
            grpc: 8001,
            metrics: 8002,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TritonConfigSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Passed to the server as `--<name>=<value>`, in order.
    #[serde(default)]
    pub parameters: Vec<TritonParameter>,
    #[serde(default)]
    pub backend_type: Option<BackendType>,
    #[serde(default, rename = "python_backend")]
    pub python_backend: Option<PythonBackendSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TritonParameter {
    pub name: String,
    pub value: String,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendType {
    Python,
    Tensorflow,
    Pytorch,
    Onnxruntime,
    Tensorrt,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PythonBackendSpec {
    #[serde(default)]
    pub shm_default_byte_size: Option<i64>,
    #[serde(default)]
    pub extra_args: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    #[serde(default)]
    pub http_port: Option<i32>,
    #[serde(default)]
    pub grpc_port: Option<i32>,
    #[serde(default)]
    pub metrics_port: Option<i32>,
}

/// Telemetry wiring of a server. Nothing is injected unless `enabled` is set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySpec {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP endpoint traces are pushed to.
    #[serde(default)]
    pub collector_endpoint: Option<String>,
    #[serde(default)]
    pub logging: Option<LoggingSpec>,
    #[serde(default)]
    pub tracing: Option<TracingSpec>,
    #[serde(default)]
    pub profiling: Option<ProfilingSpec>,
    #[serde(default)]
    pub metrics: Option<MetricsSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSpec {
    #[serde(default = "LoggingSpec::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingSpec {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            level: LogLevel::default(),
        }
    }
}

impl LoggingSpec {
    const fn default_enabled() -> bool {
        true
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Verbose,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TracingSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Kept verbatim so the configured rate reaches the server unchanged.
    #[serde(default = "TracingSpec::default_sampling_rate")]
    pub sampling_rate: String,
}

impl Default for TracingSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            sampling_rate: Self::default_sampling_rate(),
        }
    }
}

impl TracingSpec {
    fn default_sampling_rate() -> String {
        "0.1".into()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfilingSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub profiles: Option<ProfileTypes>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileTypes {
    #[serde(default = "ProfileTypes::default_enabled")]
    pub cpu: bool,
    #[serde(default = "ProfileTypes::default_enabled")]
    pub memory: bool,
}

impl Default for ProfileTypes {
    fn default() -> Self {
        Self {
            cpu: Self::default_enabled(),
            memory: Self::default_enabled(),
        }
    }
}

impl ProfileTypes {
    const fn default_enabled() -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    #[serde(default = "MetricsSpec::default_enabled")]
    pub enabled: bool,
    #[serde(default = "MetricsSpec::default_interval")]
    pub interval: String,
    #[serde(default)]
    pub enable_service_monitor: bool,
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            interval: Self::default_interval(),
            enable_service_monitor: false,
        }
    }
}

impl MetricsSpec {
    const fn default_enabled() -> bool {
        true
    }

    fn default_interval() -> String {
        "15s".into()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TritonServerStatus {
    #[serde(default)]
    pub phase: Option<TritonServerPhase>,
    #[serde(default)]
    pub deployment_name: Option<String>,
    #[serde(default)]
    pub service_endpoint: Option<String>,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum TritonServerPhase {
    #[default]
    Pending,
    Running,
    Failed,
}
