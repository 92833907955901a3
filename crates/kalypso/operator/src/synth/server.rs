use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{
            Container, ContainerPort, EnvFromSource, EnvVar, HTTPGetAction, Probe,
            SecretEnvSource, Service, ServicePort,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, OwnerReference},
        util::intstr::IntOrString,
    },
};
use kalypso_api::{
    application::{ApplicationCrd, StorageSpec},
    monitoring::{ServiceMonitor, ServiceMonitorEndpoint},
    server::{Ports, TritonServerCrd, TritonServerSpec},
};
use kalypso_core_k8s::{
    meta::{merge_labels, set_controller_reference},
    Result,
};
use kube::ResourceExt;

use super::{observability, server_labels, server_selector};

pub const CONTAINER_NAME: &str = "tritonserver";

const PORT_GRPC: &str = "grpc";
const PORT_HTTP: &str = "http";
const PORT_METRICS: &str = "metrics";

pub fn deployment_name(server: &str) -> String {
    format!("{server}-deploy")
}

pub fn service_name(server: &str) -> String {
    format!("{server}-svc")
}

pub fn service_monitor_name(server: &str) -> String {
    format!("{server}-monitor")
}

pub fn service_endpoint(server: &str, namespace: &str, http_port: i32) -> String {
    format!(
        "http://{service}.{namespace}.svc:{http_port}",
        service = service_name(server),
    )
}

/// Images used when a server leaves its image or tag empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDefaults {
    pub image: String,
    pub tag: String,
}

pub fn image(spec: &TritonServerSpec, defaults: &ImageDefaults) -> String {
    let pick = |value: Option<&String>, default: &String| {
        value
            .filter(|value| !value.is_empty())
            .unwrap_or(default)
            .clone()
    };
    let config = &spec.triton_config;
    format!(
        "{image}:{tag}",
        image = pick(config.image.as_ref(), &defaults.image),
        tag = pick(config.tag.as_ref(), &defaults.tag),
    )
}

pub fn args(spec: &TritonServerSpec, plan: &observability::Plan) -> Vec<String> {
    let config = &spec.triton_config;

    let mut args = vec![
        "tritonserver".to_string(),
        format!("--model-repository={}", spec.storage_uri),
    ];
    args.extend(
        config
            .parameters
            .iter()
            .map(|parameter| format!("--{}={}", parameter.name, parameter.value)),
    );
    if let Some(size) = config
        .python_backend
        .as_ref()
        .and_then(|python| python.shm_default_byte_size)
    {
        args.push(format!(
            "--backend-config=python,shm-default-byte-size={size}"
        ));
    }
    args.extend(plan.args.iter().cloned());
    args
}

/// Storage credentials are shared through the application, so rotating them
/// there reaches every server.
pub fn env(storage: Option<&StorageSpec>) -> (Vec<EnvVar>, Vec<EnvFromSource>) {
    let Some(storage) = storage else {
        return Default::default();
    };

    let var = |name: &str, value: &str| EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    };

    let mut env = Vec::default();
    if let Some(endpoint) = storage.endpoint.as_deref().filter(|value| !value.is_empty()) {
        env.push(var("AWS_ENDPOINT_URL", endpoint));
        env.push(var("S3_ENDPOINT", endpoint));
    }
    if let Some(region) = storage.region.as_deref().filter(|value| !value.is_empty()) {
        env.push(var("AWS_DEFAULT_REGION", region));
    }

    let env_from = if storage.secret_name.is_empty() {
        Vec::default()
    } else {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(storage.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }]
    };
    (env, env_from)
}

fn container_ports(ports: Ports) -> Vec<ContainerPort> {
    [
        (PORT_HTTP, ports.http),
        (PORT_GRPC, ports.grpc),
        (PORT_METRICS, ports.metrics),
    ]
    .into_iter()
    .map(|(name, port)| ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    })
    .collect()
}

// Unset probe fields are spelled out with the platform defaults so a stored
// deployment compares equal to a freshly synthesized one.
fn probe(path: &str, port: i32, initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.into()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(1),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

pub struct DeploymentContext<'a> {
    pub server: &'a TritonServerCrd,
    pub application: &'a ApplicationCrd,
    pub defaults: &'a ImageDefaults,
    pub plan: &'a observability::Plan,
    pub owner: OwnerReference,
}

pub fn deployment(deployment: &mut Deployment, ctx: DeploymentContext<'_>) -> Result<()> {
    let DeploymentContext {
        server,
        application,
        defaults,
        plan,
        owner,
    } = ctx;
    let name = server.name_any();
    let spec = &server.spec;
    let ports = spec.ports();
    let labels = server_labels(&name, &spec.application_ref);

    deployment.metadata.labels = Some(merge_labels(deployment.metadata.labels.as_ref(), &labels));
    set_controller_reference(&mut deployment.metadata, owner)?;

    let deployment_spec = deployment.spec.get_or_insert_with(Default::default);
    deployment_spec.replicas = Some(spec.replicas());
    // the selector is immutable once created
    if deployment_spec.selector.match_labels.is_none() {
        deployment_spec.selector = LabelSelector {
            match_labels: Some(server_selector(&name)),
            ..Default::default()
        };
    }

    let template = &mut deployment_spec.template;
    let metadata = template.metadata.get_or_insert_with(Default::default);
    metadata.labels = Some(merge_labels(metadata.labels.as_ref(), &labels));
    metadata.annotations = {
        let mut annotations: BTreeMap<_, _> = metadata.annotations.take().unwrap_or_default();
        for key in observability::managed_annotations() {
            annotations.remove(&key);
        }
        annotations.extend(plan.annotations.clone());
        if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        }
    };

    let pod = template.spec.get_or_insert_with(Default::default);
    let container = match pod
        .containers
        .iter()
        .position(|container| container.name == CONTAINER_NAME)
    {
        Some(index) => &mut pod.containers[index],
        None => {
            pod.containers.push(Container {
                name: CONTAINER_NAME.into(),
                ..Default::default()
            });
            let last = pod.containers.len() - 1;
            &mut pod.containers[last]
        }
    };

    let (env, env_from) = env(application.spec.storage.as_ref());
    container.image = Some(image(spec, defaults));
    container.args = Some(args(spec, plan));
    container.env = non_empty(env);
    container.env_from = non_empty(env_from);
    container.ports = Some(container_ports(ports));
    container.readiness_probe = Some(probe("/v2/health/ready", ports.http, 10, 5));
    container.liveness_probe = Some(probe("/v2/health/live", ports.http, 15, 10));
    container.resources = spec.resources.clone();
    Ok(())
}

pub fn service(service: &mut Service, server: &TritonServerCrd, owner: OwnerReference) -> Result<()> {
    let name = server.name_any();
    let ports = server.spec.ports();
    let labels = server_labels(&name, &server.spec.application_ref);

    service.metadata.labels = Some(merge_labels(service.metadata.labels.as_ref(), &labels));
    set_controller_reference(&mut service.metadata, owner)?;

    // cluster-assigned fields (cluster IPs, families) are left alone
    let spec = service.spec.get_or_insert_with(Default::default);
    spec.type_ = Some("ClusterIP".into());
    spec.selector = Some(server_selector(&name));
    spec.ports = Some(
        [
            (PORT_HTTP, ports.http),
            (PORT_GRPC, ports.grpc),
            (PORT_METRICS, ports.metrics),
        ]
        .into_iter()
        .map(|(port_name, port)| ServicePort {
            name: Some(port_name.into()),
            port,
            target_port: Some(IntOrString::String(port_name.into())),
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect(),
    );
    Ok(())
}

pub fn service_monitor(
    monitor: &mut ServiceMonitor,
    server: &TritonServerCrd,
    interval: &str,
    owner: OwnerReference,
) -> Result<()> {
    let name = server.name_any();
    let labels = server_labels(&name, &server.spec.application_ref);

    monitor.metadata.labels = Some(merge_labels(monitor.metadata.labels.as_ref(), &labels));
    set_controller_reference(&mut monitor.metadata, owner)?;

    monitor.spec.selector = LabelSelector {
        match_labels: Some(server_selector(&name)),
        ..Default::default()
    };
    monitor.spec.endpoints = vec![ServiceMonitorEndpoint {
        port: Some(PORT_METRICS.into()),
        path: Some("/metrics".into()),
        interval: Some(interval.into()),
    }];
    Ok(())
}
