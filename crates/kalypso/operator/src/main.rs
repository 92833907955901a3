mod ctx;
mod synth;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{LimitRange, Namespace, ResourceQuota, Service},
};
use kalypso_api::{
    application::ApplicationCrd, monitoring::ServiceMonitor, project::ProjectCrd,
    server::TritonServerCrd,
};
use kalypso_core_k8s::{
    manager::{discover, install_crd, Manager},
    registry::Registry,
    store::KubeStore,
    Cluster,
};
use kube::{
    runtime::{reflector::ObjectRef, watcher::Config},
    Api, Client, ResourceExt,
};
use tokio::join;
use tracing::info;

pub(crate) mod consts {
    use kalypso_core::env::{infer_or, infer_string_or};

    pub const NAME: &str = "kalypso-operator";

    const ENV_GATEWAY_URL: &str = "KALYPSO_GATEWAY_URL";
    const ENV_INSTALL_CRDS: &str = "KALYPSO_INSTALL_CRDS";
    const ENV_TRITON_IMAGE: &str = "KALYPSO_TRITON_IMAGE";
    const ENV_TRITON_TAG: &str = "KALYPSO_TRITON_TAG";

    pub fn infer_gateway_url() -> String {
        infer_string_or(ENV_GATEWAY_URL, "http://istio-gateway.istio-system.svc")
    }

    pub fn infer_install_crds() -> bool {
        infer_or(ENV_INSTALL_CRDS, true)
    }

    pub fn infer_triton_image() -> String {
        infer_string_or(ENV_TRITON_IMAGE, "nvcr.io/nvidia/tritonserver")
    }

    pub fn infer_triton_tag() -> String {
        infer_string_or(ENV_TRITON_TAG, "24.12-py3")
    }
}

/// Kinds every reconciler may read or write.
fn registry() -> Registry {
    Registry::default()
        .with::<Namespace>()
        .with::<ResourceQuota>()
        .with::<LimitRange>()
        .with::<Deployment>()
        .with::<Service>()
        .with::<ProjectCrd>()
        .with::<ApplicationCrd>()
        .with::<TritonServerCrd>()
}

#[tokio::main]
async fn main() -> Result<()> {
    ::kalypso_core::tracer::init_once_with_default(consts::NAME, true);

    let kube = Client::try_default().await?;

    if consts::infer_install_crds() {
        install_crd::<ProjectCrd>(kube.clone(), consts::NAME).await?;
        install_crd::<ApplicationCrd>(kube.clone(), consts::NAME).await?;
        install_crd::<TritonServerCrd>(kube.clone(), consts::NAME).await?;
    }

    let mut registry = registry();
    discover::<ServiceMonitor>(kube.clone(), &mut registry).await?;
    info!("registered {} kinds", registry.len());

    let cluster = Cluster::new(
        Arc::new(KubeStore::new(kube.clone(), consts::NAME)),
        Arc::new(registry),
    );

    let project = Arc::new(Manager::new(
        kube.clone(),
        cluster.clone(),
        ctx::project::Ctx,
    ));
    let application = Arc::new(Manager::new(
        kube.clone(),
        cluster.clone(),
        ctx::application::Ctx {
            gateway_url: consts::infer_gateway_url(),
        },
    ));
    let server = Arc::new(Manager::new(
        kube.clone(),
        cluster,
        ctx::server::Ctx {
            defaults: synth::server::ImageDefaults {
                image: consts::infer_triton_image(),
                tag: consts::infer_triton_tag(),
            },
        },
    ));

    join!(
        project.run(|controller| controller),
        // servers moving between applications change their counts
        application.run(|controller| {
            controller.watches(
                Api::<TritonServerCrd>::all(kube.clone()),
                Config::default(),
                |server| {
                    let namespace = server.namespace()?;
                    Some(ObjectRef::new(&server.spec.application_ref).within(&namespace))
                },
            )
        }),
        server.run(|controller| {
            controller
                .owns(Api::<Deployment>::all(kube.clone()), Config::default())
                .owns(Api::<Service>::all(kube.clone()), Config::default())
        }),
    );
    Ok(())
}
