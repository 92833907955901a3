use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "serving.serving.kalypso.io",
    version = "v1alpha1",
    kind = "KalypsoApplication",
    root = "ApplicationCrd",
    status = "ApplicationStatus",
    shortname = "kapp",
    namespaced,
    derive = "Default",
    printcolumn = r#"{
        "name": "project",
        "type": "string",
        "description": "referenced project name",
        "jsonPath": ".spec.projectRef"
    }"#,
    printcolumn = r#"{
        "name": "phase",
        "type": "string",
        "description": "phase of the application",
        "jsonPath": ".status.phase"
    }"#,
    printcolumn = r#"{
        "name": "models",
        "type": "integer",
        "description": "number of triton servers referring to the application",
        "jsonPath": ".status.activeModels"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Name of a `KalypsoProject` in the same namespace.
    pub project_ref: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<GitSourceSpec>,
    /// Model storage shared by every server of the application.
    #[serde(default)]
    pub storage: Option<StorageSpec>,
}

impl ApplicationCrd {
    pub const FINALIZER_NAME: &'static str = "serving.kalypso.io/application-finalizer";

    pub fn phase(&self) -> Option<ApplicationPhase> {
        self.status.as_ref().and_then(|status| status.phase)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceSpec {
    pub git_repository: String,
    #[serde(default = "GitSourceSpec::default_branch")]
    pub branch: String,
    #[serde(default)]
    pub build_workflow: Option<String>,
}

impl GitSourceSpec {
    fn default_branch() -> String {
        "main".into()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Secret holding the storage credentials, exposed to servers as-is.
    pub secret_name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub phase: Option<ApplicationPhase>,
    #[serde(default)]
    pub active_models: u32,
    #[serde(default)]
    pub gateway_endpoint: Option<String>,
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
pub enum ApplicationPhase {
    #[default]
    Pending,
    Ready,
    Failed,
}
