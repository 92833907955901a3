use async_trait::async_trait;
use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Service},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kalypso_api::{
    application::ApplicationCrd,
    monitoring::ServiceMonitor,
    server::{TritonServerCrd, TritonServerPhase},
};
use kalypso_core_k8s::{
    ctx::{Outcome, Reference},
    meta::{controller_reference, find_condition, set_condition, ConditionSpec},
    upsert::upsert,
    Cluster, Error, Result,
};
use kube::ResourceExt;
use tracing::{info, instrument, Level};

use super::{step, REASON_RECONCILIATION_FAILED};
use crate::synth::{
    self,
    observability,
    server::{DeploymentContext, ImageDefaults},
};

const CONDITION_OBSERVABILITY: &str = "ObservabilityConfigured";

pub struct Ctx {
    pub defaults: ImageDefaults,
}

fn set_failed(data: &mut TritonServerCrd, message: String) {
    let generation = data.metadata.generation;
    let status = data.status.get_or_insert_with(Default::default);
    status.phase = Some(TritonServerPhase::Failed);
    status.message = Some(message.clone());
    status.conditions = set_condition(
        &status.conditions,
        ConditionSpec {
            type_: "Available",
            status: false,
            reason: REASON_RECONCILIATION_FAILED,
            message,
            observed_generation: generation,
        },
    );
}

#[async_trait]
impl ::kalypso_core_k8s::ctx::Ctx for Ctx {
    type Data = TritonServerCrd;
    type Parent = ApplicationCrd;

    const NAME: &'static str = crate::consts::NAME;
    const FINALIZER_NAME: &'static str = TritonServerCrd::FINALIZER_NAME;

    fn is_initialized(data: &Self::Data) -> bool {
        data.phase().is_some()
    }

    fn initialize(data: &mut Self::Data) {
        data.status.get_or_insert_with(Default::default).phase = Some(TritonServerPhase::Pending);
    }

    async fn resolve(
        &self,
        cluster: &Cluster,
        data: &Self::Data,
    ) -> Result<Reference<ApplicationCrd>> {
        let application_ref = &data.spec.application_ref;
        let namespace = data.namespace();

        match cluster
            .get::<ApplicationCrd>(namespace.as_deref(), application_ref)
            .await?
        {
            Some(application) => Ok(Reference::Ready(application)),
            None => Ok(Reference::Missing(format!(
                "KalypsoApplication '{application_ref}' not found"
            ))),
        }
    }

    fn on_missing(data: &mut Self::Data, message: String) {
        set_failed(data, message)
    }

    fn on_failure(data: &mut Self::Data, error: &Error) {
        set_failed(data, error.to_string())
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any()), err(Display))]
    async fn apply(
        &self,
        cluster: &Cluster,
        data: &mut Self::Data,
        application: ApplicationCrd,
    ) -> Result<Outcome> {
        let server = data.clone();
        let name = server.name_any();
        let namespace = server
            .namespace()
            .ok_or(Error::MissingField("metadata.namespace"))?;
        let owner = controller_reference(&server)?;
        let plan = observability::plan(&name, server.spec.observability.as_ref());

        let deployment_name = synth::server::deployment_name(&name);
        let (deployment, _) =
            upsert::<Deployment, _>(cluster, Some(&namespace), &deployment_name, |object| {
                synth::server::deployment(
                    object,
                    DeploymentContext {
                        server: &server,
                        application: &application,
                        defaults: &self.defaults,
                        plan: &plan,
                        owner: owner.clone(),
                    },
                )
            })
            .await
            .map_err(step("Failed to reconcile Deployment"))?;

        let service_name = synth::server::service_name(&name);
        upsert::<Service, _>(cluster, Some(&namespace), &service_name, |object| {
            synth::server::service(object, &server, owner.clone())
        })
        .await
        .map_err(step("Failed to reconcile Service"))?;

        reconcile_service_monitor(
            cluster,
            &server,
            &namespace,
            plan.scrape_interval.as_deref(),
            owner,
        )
        .await
        .map_err(step("Failed to reconcile ServiceMonitor"))?;

        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or_default();

        let generation = data.metadata.generation;
        let status = data.status.get_or_insert_with(Default::default);
        status.deployment_name = Some(deployment_name);
        status.service_endpoint = Some(synth::server::service_endpoint(
            &name,
            &namespace,
            server.spec.ports().http,
        ));
        status.available_replicas = available;

        let (phase, message, condition) = if available > 0 {
            (
                TritonServerPhase::Running,
                "Triton Server is ready to serve inference.",
                ConditionSpec {
                    type_: "Available",
                    status: true,
                    reason: "DeploymentReady",
                    message: format!("Deployment has {available} available replicas"),
                    observed_generation: generation,
                },
            )
        } else {
            (
                TritonServerPhase::Pending,
                "Waiting for Triton Server to become ready.",
                ConditionSpec {
                    type_: "Available",
                    status: false,
                    reason: "DeploymentNotReady",
                    message: "Deployment has no available replicas".into(),
                    observed_generation: generation,
                },
            )
        };
        status.phase = Some(phase);
        status.message = Some(message.into());
        status.conditions = set_condition(&status.conditions, condition);

        // only published once something could not be applied
        if !plan.warnings.is_empty()
            || find_condition(&status.conditions, CONDITION_OBSERVABILITY).is_some()
        {
            let (applied, reason, message) = if plan.warnings.is_empty() {
                (
                    true,
                    "ObservabilityApplied",
                    "Observability settings are applied".into(),
                )
            } else {
                (false, "IncompleteObservability", plan.warnings.join("; "))
            };
            let condition = ConditionSpec {
                type_: CONDITION_OBSERVABILITY,
                status: applied,
                reason,
                message,
                observed_generation: generation,
            };
            status.conditions = set_condition(&status.conditions, condition);
        }
        Ok(Outcome::Done)
    }
}

/// Keeps the server's `ServiceMonitor` in line with its metrics toggle.
///
/// Clusters without the Prometheus Operator are served without one.
async fn reconcile_service_monitor(
    cluster: &Cluster,
    server: &TritonServerCrd,
    namespace: &str,
    interval: Option<&str>,
    owner: OwnerReference,
) -> Result<()> {
    let name = synth::server::service_monitor_name(&server.name_any());
    if !cluster.registry().contains::<ServiceMonitor>() {
        if interval.is_some() {
            info!("ServiceMonitor CRD is not installed; skipping {name:?}");
        }
        return Ok(());
    }

    match interval {
        Some(interval) => {
            upsert::<ServiceMonitor, _>(cluster, Some(namespace), &name, |object| {
                synth::server::service_monitor(object, server, interval, owner)
            })
            .await?;
            Ok(())
        }
        None => {
            let Some(monitor) = cluster
                .get::<ServiceMonitor>(Some(namespace), &name)
                .await?
            else {
                return Ok(());
            };
            let owned = monitor
                .owner_references()
                .iter()
                .any(|reference| reference.uid == owner.uid);
            if !owned {
                return Ok(());
            }
            match cluster.delete::<ServiceMonitor>(Some(namespace), &name).await {
                Ok(()) => {
                    info!("deleted ServiceMonitor {name:?}");
                    Ok(())
                }
                Err(error) if error.is_not_found() => Ok(()),
                Err(error) => Err(error),
            }
        }
    }
}
