use async_trait::async_trait;
use kalypso_api::{
    application::{ApplicationCrd, ApplicationPhase},
    project::{ProjectCrd, ProjectPhase},
    server::TritonServerCrd,
};
use kalypso_core_k8s::{
    ctx::{Outcome, Reference},
    meta::{set_condition, ConditionSpec},
    Cluster, Error, Result,
};
use kube::ResourceExt;
use tracing::{instrument, warn, Level};

use super::REASON_RECONCILIATION_FAILED;

pub struct Ctx {
    /// Base URL of the inference gateway; applications are routed by name.
    pub gateway_url: String,
}

impl Ctx {
    fn gateway_endpoint(&self, application: &str) -> String {
        format!("{}/{application}", self.gateway_url.trim_end_matches('/'))
    }
}

fn set_failed(data: &mut ApplicationCrd, message: String) {
    let generation = data.metadata.generation;
    let status = data.status.get_or_insert_with(Default::default);
    status.phase = Some(ApplicationPhase::Failed);
    status.conditions = set_condition(
        &status.conditions,
        ConditionSpec {
            type_: "Ready",
            status: false,
            reason: REASON_RECONCILIATION_FAILED,
            message,
            observed_generation: generation,
        },
    );
}

#[async_trait]
impl ::kalypso_core_k8s::ctx::Ctx for Ctx {
    type Data = ApplicationCrd;
    type Parent = ProjectCrd;

    const NAME: &'static str = crate::consts::NAME;
    const FINALIZER_NAME: &'static str = ApplicationCrd::FINALIZER_NAME;

    fn is_initialized(data: &Self::Data) -> bool {
        data.phase().is_some()
    }

    fn initialize(data: &mut Self::Data) {
        data.status.get_or_insert_with(Default::default).phase = Some(ApplicationPhase::Pending);
    }

    async fn resolve(&self, cluster: &Cluster, data: &Self::Data) -> Result<Reference<ProjectCrd>> {
        let project_ref = &data.spec.project_ref;
        let namespace = data.namespace();

        match cluster
            .get::<ProjectCrd>(namespace.as_deref(), project_ref)
            .await?
        {
            None => Ok(Reference::Missing(format!(
                "KalypsoProject '{project_ref}' not found"
            ))),
            Some(project) if project.phase() != Some(ProjectPhase::Ready) => {
                let phase = project.phase().unwrap_or_default();
                Ok(Reference::NotReady(format!(
                    "KalypsoProject '{project_ref}' is in phase: {phase}"
                )))
            }
            Some(project) => Ok(Reference::Ready(project)),
        }
    }

    fn on_missing(data: &mut Self::Data, message: String) {
        set_failed(data, message)
    }

    fn on_pending(data: &mut Self::Data, message: String) {
        let generation = data.metadata.generation;
        let status = data.status.get_or_insert_with(Default::default);
        status.phase = Some(ApplicationPhase::Pending);
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "ProjectReady",
                status: false,
                reason: "ProjectNotReady",
                message,
                observed_generation: generation,
            },
        );
    }

    fn on_failure(data: &mut Self::Data, error: &Error) {
        set_failed(data, error.to_string())
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any()), err(Display))]
    async fn apply(
        &self,
        cluster: &Cluster,
        data: &mut Self::Data,
        project: ProjectCrd,
    ) -> Result<Outcome> {
        let name = data.name_any();
        let namespace = data.namespace();
        let generation = data.metadata.generation;

        let status = data.status.get_or_insert_with(Default::default);

        // a failed count keeps the last known value instead of publishing 0
        match cluster.list::<TritonServerCrd>(namespace.as_deref()).await {
            Ok(servers) => {
                let count = servers
                    .iter()
                    .filter(|server| server.spec.application_ref == name)
                    .count();
                status.active_models = u32::try_from(count).unwrap_or(u32::MAX);
            }
            Err(error) => warn!("failed to count the servers of {name:?}: {error}"),
        }

        status.phase = Some(ApplicationPhase::Ready);
        status.gateway_endpoint = Some(self.gateway_endpoint(&name));
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "ProjectReady",
                status: true,
                reason: "ProjectValidated",
                message: format!("KalypsoProject '{}' is ready", project.name_any()),
                observed_generation: generation,
            },
        );
        status.conditions = set_condition(
            &status.conditions,
            ConditionSpec {
                type_: "Ready",
                status: true,
                reason: "ApplicationReady",
                message: "KalypsoApplication is ready to serve".into(),
                observed_generation: generation,
            },
        );
        Ok(Outcome::Done)
    }
}
