//! The subset of the Prometheus Operator's `ServiceMonitor` the servers use.
//!
//! The CRD itself is owned by the Prometheus Operator and is never installed
//! from here.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    #[serde(default)]
    pub endpoints: Vec<ServiceMonitorEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
    #[serde(default)]
    pub selector: LabelSelector,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub any: bool,
    #[serde(default)]
    pub match_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use kube::Resource;
    use maplit::btreemap;

    use super::*;

    #[test]
    fn serialize_like_prometheus_operator() {
        assert_eq!(ServiceMonitor::api_version(&()), "monitoring.coreos.com/v1");
        assert_eq!(ServiceMonitor::plural(&()), "servicemonitors");

        let spec = ServiceMonitorSpec {
            endpoints: vec![ServiceMonitorEndpoint {
                port: Some("metrics".into()),
                path: Some("/metrics".into()),
                interval: Some("15s".into()),
            }],
            namespace_selector: None,
            selector: LabelSelector {
                match_labels: Some(btreemap! {
                    "kalypso-serving.io/tritonserver".into() => "resnet".into(),
                }),
                ..Default::default()
            },
        };
        let value = ::serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value["endpoints"][0],
            ::serde_json::json!({"port": "metrics", "path": "/metrics", "interval": "15s"}),
        );
        assert!(value.get("namespaceSelector").is_none());
    }
}
