use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::LimitRangeItem,
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Condition},
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "serving.serving.kalypso.io",
    version = "v1alpha1",
    kind = "KalypsoProject",
    root = "ProjectCrd",
    status = "ProjectStatus",
    shortname = "kproj",
    namespaced,
    derive = "Default",
    printcolumn = r#"{
        "name": "display-name",
        "type": "string",
        "description": "human-readable project name",
        "jsonPath": ".spec.displayName"
    }"#,
    printcolumn = r#"{
        "name": "phase",
        "type": "string",
        "description": "phase of the project",
        "jsonPath": ".status.phase"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Environment name to its isolated namespace.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentSpec>,
    #[serde(default)]
    pub model_registry: Option<ModelRegistrySpec>,
}

impl ProjectCrd {
    pub const FINALIZER_NAME: &'static str = "serving.kalypso.io/finalizer";

    pub fn phase(&self) -> Option<ProjectPhase> {
        self.status.as_ref().and_then(|status| status.phase)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Defaults to `<project>-<environment>`.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limit_range: Option<LimitRangeSpec>,
    #[serde(default)]
    pub resource_quota: Option<ResourceQuotaSpec>,
}

impl EnvironmentSpec {
    pub fn namespace_name(&self, project: &str, environment: &str) -> String {
        match self.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => namespace.into(),
            _ => format!("{project}-{environment}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitRangeSpec {
    #[serde(default)]
    pub limits: Vec<LimitRangeItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub limits: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistrySpec {
    pub url: String,
    #[serde(default)]
    pub secret_ref: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    #[serde(default)]
    pub phase: Option<ProjectPhase>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Namespaces provisioned for the environments, removed on deletion.
    #[serde(default)]
    pub created_namespaces: Vec<String>,
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
pub enum ProjectPhase {
    #[default]
    Provisioning,
    Ready,
    Failed,
}

#[cfg(test)]
mod tests {
    use kube::{CustomResourceExt, Resource};

    use super::*;

    #[test]
    fn wire_identity() {
        assert_eq!(ProjectCrd::api_version(&()), "serving.serving.kalypso.io/v1alpha1");
        assert_eq!(ProjectCrd::kind(&()), "KalypsoProject");
        assert_eq!(ProjectCrd::crd_name(), "kalypsoprojects.serving.serving.kalypso.io");
    }

    #[test]
    fn namespace_defaults_to_project_and_environment() {
        let spec = EnvironmentSpec::default();
        assert_eq!(spec.namespace_name("vision", "dev"), "vision-dev");

        let spec = EnvironmentSpec {
            namespace: Some("shared-prod".into()),
            ..Default::default()
        };
        assert_eq!(spec.namespace_name("vision", "prod"), "shared-prod");
    }

    #[test]
    fn parse_manifest() {
        let spec: ProjectSpec = ::serde_json::from_value(::serde_json::json!({
            "displayName": "Vision",
            "environments": {
                "dev": {
                    "namespace": "vision-dev",
                    "resourceQuota": {
                        "limits": { "cpu": "8" },
                        "requests": { "memory": "16Gi" },
                    },
                },
            },
        }))
        .unwrap();

        let quota = spec.environments["dev"].resource_quota.as_ref().unwrap();
        assert_eq!(quota.limits["cpu"], Quantity("8".into()));
        assert_eq!(quota.requests["memory"], Quantity("16Gi".into()));
        assert_eq!(ProjectPhase::default().to_string(), "Provisioning");
    }
}
