use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, CustomResourceExt, Resource, ResourceExt,
};
use tracing::{info, warn};

use crate::{
    cluster::{Cluster, Object},
    ctx::{self, Ctx},
    error::Error,
    registry::Registry,
};

pub struct Manager<C> {
    pub kube: Client,
    pub cluster: Cluster,
    pub ctx: C,
}

impl<C> Manager<C>
where
    C: Ctx,
{
    pub fn new(kube: Client, cluster: Cluster, ctx: C) -> Self {
        Self { kube, cluster, ctx }
    }

    /// Watches every object of `C`'s kind until the process is signalled.
    ///
    /// `configure` may add secondary watches (e.g. owned children) to the
    /// controller before it starts.
    pub async fn run<F>(self: Arc<Self>, configure: F)
    where
        F: FnOnce(Controller<C::Data>) -> Controller<C::Data>,
    {
        let api = Api::<C::Data>::all(self.kube.clone());

        info!("starting {} controller", C::NAME);
        configure(Controller::new(api, Config::default()))
            .shutdown_on_signal()
            .run(
                |data, manager| async move { manager.reconcile(&data).await },
                |data, error, _manager| {
                    let kind = <C::Data as Resource>::kind(&());
                    let name = data.name_any();
                    warn!("failed to reconcile {kind} {name:?}: {error}");
                    Action::requeue(C::FALLBACK)
                },
                self,
            )
            .for_each(|_| ::futures::future::ready(()))
            .await
    }

    async fn reconcile(&self, data: &C::Data) -> Result<Action, Error> {
        let namespace = data.namespace();
        let name = data.name_any();

        ctx::reconcile(&self.ctx, &self.cluster, namespace.as_deref(), &name)
            .await
            .map(ctx::Outcome::into_action)
    }
}

/// Creates the CRD of `K`, or patches it to the compiled schema when it
/// already exists.
pub async fn install_crd<K>(kube: Client, field_manager: &str) -> Result<(), Error>
where
    K: CustomResourceExt,
{
    let api = Api::<CustomResourceDefinition>::all(kube);
    let crd = K::crd();
    let name = crd.name_any();

    if api.get_opt(&name).await?.is_none() {
        let pp = PostParams {
            dry_run: false,
            field_manager: Some(field_manager.into()),
        };
        api.create(&pp, &crd).await?;

        info!("Created CRD: {name}");
    } else {
        let pp = PatchParams {
            dry_run: false,
            force: true,
            field_manager: Some(field_manager.into()),
            ..Default::default()
        };
        api.patch(&name, &pp, &Patch::Apply(&crd)).await?;

        info!("Updated CRD: {name}");
    }
    Ok(())
}

/// Registers `K` only when its CRD is installed in the cluster.
pub async fn discover<K>(kube: Client, registry: &mut Registry) -> Result<bool, Error>
where
    K: Object,
{
    let api = Api::<CustomResourceDefinition>::all(kube);
    let name = format!("{}.{}", K::plural(&()), K::group(&()));

    if api.get_opt(&name).await?.is_some() {
        info!("discovered optional kind: {name}");
        registry.register::<K>();
        Ok(true)
    } else {
        info!("optional kind is not installed: {name}");
        Ok(false)
    }
}
