use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{LimitRange, LimitRangeSpec, Namespace, ResourceQuota, ResourceQuotaSpec},
    apimachinery::pkg::api::resource::Quantity,
};
use kalypso_api::project;
use kalypso_core_k8s::meta::merge_labels;

pub fn quota_name(project: &str) -> String {
    format!("{project}-quota")
}

pub fn limit_range_name(project: &str) -> String {
    format!("{project}-limits")
}

/// Flattens a quota spec into `hard` limits: `limits` keep their keys and
/// `requests` are prefixed with `requests.`.
pub fn quota_hard(spec: &project::ResourceQuotaSpec) -> BTreeMap<String, Quantity> {
    let limits = spec
        .limits
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()));
    let requests = spec
        .requests
        .iter()
        .map(|(key, value)| (format!("requests.{key}"), value.clone()));
    limits.chain(requests).collect()
}

pub fn namespace(namespace: &mut Namespace, labels: &BTreeMap<String, String>) {
    namespace.metadata.labels = Some(merge_labels(namespace.metadata.labels.as_ref(), labels));
}

pub fn resource_quota(
    quota: &mut ResourceQuota,
    labels: &BTreeMap<String, String>,
    spec: &project::ResourceQuotaSpec,
) {
    quota.metadata.labels = Some(merge_labels(quota.metadata.labels.as_ref(), labels));
    quota.spec = Some(ResourceQuotaSpec {
        hard: Some(quota_hard(spec)),
        ..quota.spec.take().unwrap_or_default()
    });
}

pub fn limit_range(
    limit_range: &mut LimitRange,
    labels: &BTreeMap<String, String>,
    spec: &project::LimitRangeSpec,
) {
    limit_range.metadata.labels = Some(merge_labels(limit_range.metadata.labels.as_ref(), labels));
    limit_range.spec = Some(LimitRangeSpec {
        limits: spec.limits.clone(),
    });
}
