use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LimitRange, Namespace, ResourceQuota};
use kalypso_api::{
    consts::LABEL_PROJECT,
    project::{ProjectCrd, ProjectPhase},
};
use kalypso_core_k8s::{
    ctx::{Outcome, Reference},
    meta::{has_label, set_condition, ConditionSpec},
    upsert::upsert,
    Cluster, Error, Result,
};
use kube::ResourceExt;
use tracing::{info, instrument, Level};

use super::{step, REASON_RECONCILIATION_FAILED};
use crate::synth::{self, environment_labels};

#[derive(Default)]
pub struct Ctx;

#[async_trait]
impl ::kalypso_core_k8s::ctx::Ctx for Ctx {
    type Data = ProjectCrd;
    type Parent = ();

    const NAME: &'static str = crate::consts::NAME;
    const FINALIZER_NAME: &'static str = ProjectCrd::FINALIZER_NAME;

    fn is_initialized(data: &Self::Data) -> bool {
        data.phase().is_some()
    }

    fn initialize(data: &mut Self::Data) {
        data.status.get_or_insert_with(Default::default).phase = Some(ProjectPhase::Provisioning);
    }

    async fn resolve(&self, _cluster: &Cluster, _data: &Self::Data) -> Result<Reference<()>> {
        Ok(Reference::Ready(()))
    }

    fn on_failure(data: &mut Self::Data, error: &Error) {
        let generation = data.metadata.generation;
        let status = data.status.get_or_insert_with(Default::default);
        status.phase = Some(ProjectPhase::Failed);
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "Ready",
                status: false,
                reason: REASON_RECONCILIATION_FAILED,
                message: error.to_string(),
                observed_generation: generation,
            },
        );
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any()), err(Display))]
    async fn apply(&self, cluster: &Cluster, data: &mut Self::Data, _parent: ()) -> Result<Outcome> {
        let project = data.name_any();

        let mut created = Vec::with_capacity(data.spec.environments.len());
        for (environment, spec) in &data.spec.environments {
            let namespace = spec.namespace_name(&project, environment);
            let labels = environment_labels(&project, environment);

            upsert::<Namespace, _>(cluster, None, &namespace, |object| {
                synth::project::namespace(object, &labels);
                Ok(())
            })
            .await
            .map_err(step(format!("Failed to create namespace {namespace}")))?;

            if let Some(quota) = &spec.resource_quota {
                let name = synth::project::quota_name(&project);
                upsert::<ResourceQuota, _>(cluster, Some(&namespace), &name, |object| {
                    synth::project::resource_quota(object, &labels, quota);
                    Ok(())
                })
                .await
                .map_err(step(format!("Failed to create ResourceQuota in {namespace}")))?;
            }

            if let Some(limits) = &spec.limit_range {
                let name = synth::project::limit_range_name(&project);
                upsert::<LimitRange, _>(cluster, Some(&namespace), &name, |object| {
                    synth::project::limit_range(object, &labels, limits);
                    Ok(())
                })
                .await
                .map_err(step(format!("Failed to create LimitRange in {namespace}")))?;
            }

            created.push(namespace);
        }

        let generation = data.metadata.generation;
        let status = data.status.get_or_insert_with(Default::default);
        let message = format!("All {} namespaces are ready", created.len());
        status.phase = Some(ProjectPhase::Ready);
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "NamespaceCreated",
                status: true,
                reason: "NamespacesReady",
                message: message.clone(),
                observed_generation: generation,
            },
        );
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "Ready",
                status: true,
                reason: "NamespacesReady",
                message,
                observed_generation: generation,
            },
        );
        status.created_namespaces = created;
        Ok(Outcome::Done)
    }

    /// Deletes the namespaces the project created; namespaces that were
    /// relabelled to another project are left alone.
    async fn finalize(&self, cluster: &Cluster, data: &Self::Data) -> Result<()> {
        let project = data.name_any();
        let created = data
            .status
            .as_ref()
            .map(|status| status.created_namespaces.as_slice())
            .unwrap_or_default();

        for name in created {
            let Some(namespace) = cluster.get::<Namespace>(None, name).await? else {
                continue;
            };
            if !has_label(&namespace.metadata, LABEL_PROJECT, &project) {
                info!("skipping namespace {name:?}: not owned by {project:?}");
                continue;
            }
            match cluster.delete::<Namespace>(None, name).await {
                Ok(()) => info!("deleted namespace {name:?}"),
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}
