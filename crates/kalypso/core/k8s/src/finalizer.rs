use kube::{Resource, ResourceExt};
use tracing::info;

use crate::{
    cluster::{Cluster, Object},
    error::Result,
};

/// Where a resource stands with respect to its cleanup gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// Live, but the token has not been added yet.
    NoFinalizer,
    /// Live and guarded.
    FinalizerPresent,
    /// Deletion requested; cleanup must run before the token is released.
    Deleting,
    /// Deletion requested and the token is already gone.
    Removed,
}

pub fn observe<K>(object: &K, token: &str) -> FinalizerState
where
    K: Resource,
{
    let deleting = object.meta().deletion_timestamp.is_some();
    let guarded = object.finalizers().iter().any(|finalizer| finalizer == token);

    match (deleting, guarded) {
        (false, false) => FinalizerState::NoFinalizer,
        (false, true) => FinalizerState::FinalizerPresent,
        (true, true) => FinalizerState::Deleting,
        (true, false) => FinalizerState::Removed,
    }
}

pub async fn add<K>(cluster: &Cluster, object: &K, token: &str) -> Result<K>
where
    K: Object,
{
    let mut object = object.clone();
    object.finalizers_mut().push(token.into());

    let object = cluster.replace(&object).await?;
    info!(
        "added finalizer tag ({}/{})",
        object.namespace().unwrap_or_default(),
        object.name_any(),
    );
    Ok(object)
}

pub async fn remove<K>(cluster: &Cluster, object: &K, token: &str) -> Result<()>
where
    K: Object,
{
    let mut object = object.clone();
    object.finalizers_mut().retain(|finalizer| finalizer != token);

    cluster.replace(&object).await?;
    info!(
        "finalizing ({}/{})",
        object.namespace().unwrap_or_default(),
        object.name_any(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::{memory::MemoryStore, registry::Registry};

    const TOKEN: &str = "test.kalypso.io/finalizer";

    #[tokio::test]
    async fn walk_through_every_state() {
        let cluster = Cluster::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Registry::default().with::<ConfigMap>()),
        );
        let cm = cluster
            .create(&ConfigMap {
                metadata: ObjectMeta {
                    name: Some("cm".into()),
                    namespace: Some("default".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(observe(&cm, TOKEN), FinalizerState::NoFinalizer);

        let cm = add(&cluster, &cm, TOKEN).await.unwrap();
        assert_eq!(observe(&cm, TOKEN), FinalizerState::FinalizerPresent);

        cluster.delete::<ConfigMap>(Some("default"), "cm").await.unwrap();
        let cm: ConfigMap = cluster.get(Some("default"), "cm").await.unwrap().unwrap();
        assert_eq!(observe(&cm, TOKEN), FinalizerState::Deleting);

        let mut released = cm.clone();
        released.finalizers_mut().clear();
        assert_eq!(observe(&released, TOKEN), FinalizerState::Removed);

        remove(&cluster, &cm, TOKEN).await.unwrap();
        let gone: Option<ConfigMap> = cluster.get(Some("default"), "cm").await.unwrap();
        assert!(gone.is_none());
    }
}
