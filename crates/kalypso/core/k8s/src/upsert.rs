use kube::Resource;
use tracing::{debug, info};

use crate::{
    cluster::{Cluster, Object},
    error::Result,
};

/// What an [`upsert`] did to the stored object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

impl Applied {
    pub const fn is_changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Brings the named object to the state `mutate` describes.
///
/// `mutate` receives either the stored object or an empty one carrying only
/// the name and namespace, and must only touch the fields it controls.
/// Nothing is written when the mutation leaves a stored object unchanged.
/// Version conflicts surface as [`crate::Error::Conflict`].
pub async fn upsert<K, F>(
    cluster: &Cluster,
    namespace: Option<&str>,
    name: &str,
    mutate: F,
) -> Result<(K, Applied)>
where
    K: Object + Default,
    F: Send + FnOnce(&mut K) -> Result<()>,
{
    let kind = K::kind(&());
    match cluster.get::<K>(namespace, name).await? {
        Some(current) => {
            let mut desired = current.clone();
            mutate(&mut desired)?;

            if ::serde_json::to_value(&current)? == ::serde_json::to_value(&desired)? {
                debug!("{kind} {name:?} is up to date");
                return Ok((current, Applied::Unchanged));
            }

            let updated = cluster.replace(&desired).await?;
            info!("updated {kind} {name:?}");
            Ok((updated, Applied::Updated))
        }
        None => {
            let mut desired = K::default();
            {
                let meta = desired.meta_mut();
                meta.name = Some(name.into());
                meta.namespace = namespace.map(Into::into);
            }
            mutate(&mut desired)?;

            let created = cluster.create(&desired).await?;
            info!("created {kind} {name:?}");
            Ok((created, Applied::Created))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceSpec};
    use maplit::btreemap;

    use super::*;
    use crate::{
        memory::{MemoryStore, Verb},
        registry::Registry,
    };

    fn cluster() -> (Arc<MemoryStore>, Cluster) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::default()
            .with::<ConfigMap>()
            .with::<Service>();
        (store.clone(), Cluster::new(store, Arc::new(registry)))
    }

    fn fill(cm: &mut ConfigMap) -> Result<()> {
        cm.data = Some(btreemap! { "mode".into() => "serve".into() });
        Ok(())
    }

    #[tokio::test]
    async fn create_then_noop() {
        let (store, cluster) = cluster();

        let (_, applied) = upsert(&cluster, Some("ns"), "cm", fill).await.unwrap();
        assert_eq!(applied, Applied::Created);

        let (_, applied) = upsert(&cluster, Some("ns"), "cm", fill).await.unwrap();
        assert_eq!(applied, Applied::Unchanged);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn update_preserves_foreign_fields() {
        let (_, cluster) = cluster();

        upsert(&cluster, Some("ns"), "svc", |svc: &mut Service| {
            svc.spec = Some(ServiceSpec {
                cluster_ip: Some("10.0.0.7".into()),
                ..Default::default()
            });
            Ok(())
        })
        .await
        .unwrap();

        let (svc, applied) = upsert(&cluster, Some("ns"), "svc", |svc: &mut Service| {
            let spec = svc.spec.get_or_insert_with(Default::default);
            spec.type_ = Some("ClusterIP".into());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(applied, Applied::Updated);

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
    }

    #[tokio::test]
    async fn conflicts_are_retryable() {
        let (store, cluster) = cluster();
        upsert(&cluster, Some("ns"), "cm", fill).await.unwrap();

        store.inject_conflict("ConfigMap", Verb::Replace);
        let error = upsert(&cluster, Some("ns"), "cm", |cm: &mut ConfigMap| {
            cm.data = None;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(error.is_conflict());
    }
}
