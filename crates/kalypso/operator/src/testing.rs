use std::sync::Arc;

use kalypso_core_k8s::{
    ctx::{reconcile, Ctx, Outcome},
    memory::MemoryStore,
    Cluster, Object,
};
use kube::Resource;

/// An in-memory cluster with every kind the operator touches registered.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub cluster: Cluster,
}

impl Default for Fixture {
    fn default() -> Self {
        let store = Arc::new(MemoryStore::new());
        let mut registry = crate::registry();
        registry.register::<::kalypso_api::monitoring::ServiceMonitor>();
        Self {
            cluster: Cluster::new(store.clone(), Arc::new(registry)),
            store,
        }
    }
}

impl Fixture {
    /// Same as [`Fixture::default`], but without the `ServiceMonitor` CRD.
    pub fn without_service_monitor() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            cluster: Cluster::new(store.clone(), Arc::new(crate::registry())),
            store,
        }
    }

    pub async fn create<K>(&self, object: &K) -> K
    where
        K: Object,
    {
        self.cluster.create(object).await.unwrap()
    }

    pub async fn get<K>(&self, namespace: Option<&str>, name: &str) -> K
    where
        K: Object,
    {
        self.cluster
            .get(namespace, name)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{} {name:?} does not exist", K::kind(&())))
    }
}

/// Reconciles until the outcome is no longer an immediate requeue.
pub async fn settle<C>(ctx: &C, cluster: &Cluster, namespace: Option<&str>, name: &str) -> Outcome
where
    C: Ctx,
{
    for _ in 0..8 {
        match reconcile(ctx, cluster, namespace, name).await.unwrap() {
            Outcome::Requeue => continue,
            outcome => return outcome,
        }
    }
    panic!("reconcile keeps requeueing")
}
