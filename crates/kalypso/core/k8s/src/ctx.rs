use core::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn, Level};

use crate::{
    cluster::{Cluster, Object},
    error::{Error, Result},
    finalizer::{self, FinalizerState},
};

/// What the host runtime should do once a reconcile returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Wait for the next change event.
    Done,
    /// Run again right away.
    Requeue,
    /// Run again after a fixed delay.
    RequeueAfter(Duration),
}

#[cfg(feature = "manager")]
impl Outcome {
    pub fn into_action(self) -> ::kube::runtime::controller::Action {
        use kube::runtime::controller::Action;

        match self {
            Self::Done => Action::await_change(),
            Self::Requeue => Action::requeue(Duration::ZERO),
            Self::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// The result of resolving the parent a resource refers to.
#[derive(Clone, Debug)]
pub enum Reference<P> {
    Ready(P),
    /// The parent does not exist.
    Missing(String),
    /// The parent exists but is not usable yet.
    NotReady(String),
}

/// The kind-specific half of a reconciler.
///
/// [`reconcile`] owns the shared control flow (finalizer gate, status
/// seeding, reference validation, failure recording and conflict retry);
/// implementors only describe how their kind resolves its parent and
/// synthesizes its children.
#[async_trait]
pub trait Ctx
where
    Self: 'static + Send + Sync,
{
    type Data: Object;
    type Parent: Send;

    const NAME: &'static str;
    const FINALIZER_NAME: &'static str;
    const FALLBACK: Duration = Duration::from_secs(30);
    const MISSING_REFERENCE_DELAY: Duration = Duration::from_secs(30);
    const PENDING_REFERENCE_DELAY: Duration = Duration::from_secs(10);

    fn is_initialized(data: &Self::Data) -> bool;

    /// Seeds the status with the initial phase.
    fn initialize(data: &mut Self::Data);

    async fn resolve(
        &self,
        cluster: &Cluster,
        data: &Self::Data,
    ) -> Result<Reference<Self::Parent>>;

    fn on_missing(data: &mut Self::Data, message: String) {
        let _ = (data, message);
    }

    fn on_pending(data: &mut Self::Data, message: String) {
        let _ = (data, message);
    }

    fn on_failure(data: &mut Self::Data, error: &Error);

    /// Synthesizes and upserts the children, recording the observed state in
    /// the status of `data`.
    async fn apply(
        &self,
        cluster: &Cluster,
        data: &mut Self::Data,
        parent: Self::Parent,
    ) -> Result<Outcome>;

    /// Runs before the finalizer token is released.
    async fn finalize(&self, cluster: &Cluster, data: &Self::Data) -> Result<()> {
        let _ = (cluster, data);
        Ok(())
    }
}

/// Reconciles one resource of `C`'s kind.
///
/// Version conflicts anywhere along the way turn into [`Outcome::Requeue`].
#[instrument(level = Level::INFO, skip(ctx, cluster), fields(kind = C::NAME), err(Display))]
pub async fn reconcile<C>(
    ctx: &C,
    cluster: &Cluster,
    namespace: Option<&str>,
    name: &str,
) -> Result<Outcome>
where
    C: Ctx,
{
    match try_reconcile(ctx, cluster, namespace, name).await {
        Err(error) if error.is_conflict() => {
            debug!("requeueing after a version conflict: {error}");
            Ok(Outcome::Requeue)
        }
        result => result,
    }
}

async fn try_reconcile<C>(
    ctx: &C,
    cluster: &Cluster,
    namespace: Option<&str>,
    name: &str,
) -> Result<Outcome>
where
    C: Ctx,
{
    let data = match cluster.get::<C::Data>(namespace, name).await? {
        Some(data) => data,
        None => return Ok(Outcome::Done),
    };

    match finalizer::observe(&data, C::FINALIZER_NAME) {
        FinalizerState::NoFinalizer => {
            finalizer::add(cluster, &data, C::FINALIZER_NAME).await?;
            return Ok(Outcome::Requeue);
        }
        FinalizerState::FinalizerPresent => {}
        FinalizerState::Deleting => {
            ctx.finalize(cluster, &data).await?;
            finalizer::remove(cluster, &data, C::FINALIZER_NAME).await?;
            return Ok(Outcome::Done);
        }
        FinalizerState::Removed => return Ok(Outcome::Done),
    }

    if !C::is_initialized(&data) {
        let mut next = data.clone();
        C::initialize(&mut next);
        cluster.replace_status(&next).await?;
        return Ok(Outcome::Requeue);
    }

    let parent = match ctx.resolve(cluster, &data).await {
        Ok(Reference::Ready(parent)) => parent,
        Ok(Reference::Missing(message)) => {
            warn!("{message}; retrying in {:?}", C::MISSING_REFERENCE_DELAY);
            let mut next = data.clone();
            C::on_missing(&mut next, message);
            write_status(cluster, &data, &next).await?;
            return Ok(Outcome::RequeueAfter(C::MISSING_REFERENCE_DELAY));
        }
        Ok(Reference::NotReady(message)) => {
            info!("{message}; retrying in {:?}", C::PENDING_REFERENCE_DELAY);
            let mut next = data.clone();
            C::on_pending(&mut next, message);
            write_status(cluster, &data, &next).await?;
            return Ok(Outcome::RequeueAfter(C::PENDING_REFERENCE_DELAY));
        }
        Err(error) => return fail::<C>(cluster, &data, error).await,
    };

    let mut next = data.clone();
    match ctx.apply(cluster, &mut next, parent).await {
        Ok(outcome) => {
            write_status(cluster, &data, &next).await?;
            Ok(outcome)
        }
        Err(error) => fail::<C>(cluster, &data, error).await,
    }
}

/// Publishes `error` through the status before handing it to the host
/// backoff. Conflicts skip the status entirely.
async fn fail<C>(cluster: &Cluster, data: &C::Data, error: Error) -> Result<Outcome>
where
    C: Ctx,
{
    if error.is_conflict() {
        return Err(error);
    }

    let mut next = data.clone();
    C::on_failure(&mut next, &error);
    if let Err(status_error) = write_status(cluster, data, &next).await {
        warn!("failed to record the failure in the status: {status_error}");
    }
    Err(error)
}

/// Writes the status of `next` unless it matches `current`.
async fn write_status<K>(cluster: &Cluster, current: &K, next: &K) -> Result<bool>
where
    K: Object,
{
    if ::serde_json::to_value(current)? == ::serde_json::to_value(next)? {
        return Ok(false);
    }
    cluster.replace_status(next).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use k8s_openapi::api::core::v1::{ConfigMap, Namespace, NamespaceStatus};
    use kube::core::ObjectMeta;

    use super::*;
    use crate::{
        memory::{MemoryStore, Verb},
        registry::Registry,
    };

    // A namespace's status phase stands in for a custom status; the parent is
    // a config map that turns ready once it carries a `ready` key.
    #[derive(Default)]
    struct Mirror {
        finalized: AtomicBool,
    }

    fn set_phase(data: &mut Namespace, phase: String) {
        data.status = Some(NamespaceStatus {
            phase: Some(phase),
            ..Default::default()
        });
    }

    #[async_trait]
    impl Ctx for Mirror {
        type Data = Namespace;
        type Parent = ConfigMap;

        const NAME: &'static str = "mirror";
        const FINALIZER_NAME: &'static str = "test.kalypso.io/mirror";

        fn is_initialized(data: &Self::Data) -> bool {
            data.status.is_some()
        }

        fn initialize(data: &mut Self::Data) {
            set_phase(data, "Pending".into())
        }

        async fn resolve(
            &self,
            cluster: &Cluster,
            _data: &Self::Data,
        ) -> Result<Reference<Self::Parent>> {
            match cluster.get::<ConfigMap>(Some("default"), "parent").await? {
                None => Ok(Reference::Missing("parent not found".into())),
                Some(parent) if parent.data.is_none() => {
                    Ok(Reference::NotReady("parent is not ready".into()))
                }
                Some(parent) => Ok(Reference::Ready(parent)),
            }
        }

        fn on_missing(data: &mut Self::Data, message: String) {
            set_phase(data, format!("Failed: {message}"))
        }

        fn on_pending(data: &mut Self::Data, message: String) {
            set_phase(data, format!("Pending: {message}"))
        }

        fn on_failure(data: &mut Self::Data, error: &Error) {
            set_phase(data, format!("Failed: {error}"))
        }

        async fn apply(
            &self,
            _cluster: &Cluster,
            data: &mut Self::Data,
            _parent: Self::Parent,
        ) -> Result<Outcome> {
            set_phase(data, "Ready".into());
            Ok(Outcome::Done)
        }

        async fn finalize(&self, _cluster: &Cluster, _data: &Self::Data) -> Result<()> {
            self.finalized.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<MemoryStore>, Cluster) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::default()
            .with::<ConfigMap>()
            .with::<Namespace>();
        (store.clone(), Cluster::new(store, Arc::new(registry)))
    }

    fn namespace() -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("child".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn current(cluster: &Cluster) -> Namespace {
        cluster.get(None, "child").await.unwrap().unwrap()
    }

    async fn phase(cluster: &Cluster) -> String {
        current(cluster)
            .await
            .status
            .and_then(|status| status.phase)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn drive_through_lifecycle() {
        let (store, cluster) = setup();
        let ctx = Mirror::default();
        let run = || reconcile(&ctx, &cluster, None, "child");

        assert_eq!(run().await.unwrap(), Outcome::Done);

        cluster.create(&namespace()).await.unwrap();

        // finalizer first, then the initial phase
        assert_eq!(run().await.unwrap(), Outcome::Requeue);
        assert_eq!(current(&cluster).await.metadata.finalizers.unwrap().len(), 1);
        assert_eq!(run().await.unwrap(), Outcome::Requeue);
        assert_eq!(phase(&cluster).await, "Pending");

        assert_eq!(
            run().await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(30)),
        );
        assert_eq!(phase(&cluster).await, "Failed: parent not found");

        let parent = ConfigMap {
            metadata: ObjectMeta {
                name: Some("parent".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut parent = cluster.create(&parent).await.unwrap();
        assert_eq!(
            run().await.unwrap(),
            Outcome::RequeueAfter(Duration::from_secs(10)),
        );
        assert_eq!(phase(&cluster).await, "Pending: parent is not ready");

        parent.data = Some([("ready".to_string(), "true".to_string())].into());
        cluster.replace(&parent).await.unwrap();
        assert_eq!(run().await.unwrap(), Outcome::Done);
        assert_eq!(phase(&cluster).await, "Ready");

        // converged: nothing more to write
        store.clear_writes();
        assert_eq!(run().await.unwrap(), Outcome::Done);
        assert_eq!(store.write_count(), 0);

        cluster.delete::<Namespace>(None, "child").await.unwrap();
        assert_eq!(run().await.unwrap(), Outcome::Done);
        assert!(ctx.finalized.load(Ordering::SeqCst));
        let gone: Option<Namespace> = cluster.get(None, "child").await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn conflicts_requeue_without_failure() {
        let (store, cluster) = setup();
        let ctx = Mirror::default();
        cluster.create(&namespace()).await.unwrap();

        store.inject_conflict("Namespace", Verb::Replace);
        let outcome = reconcile(&ctx, &cluster, None, "child").await.unwrap();
        assert_eq!(outcome, Outcome::Requeue);
        assert!(current(&cluster).await.metadata.finalizers.is_none());
        assert!(current(&cluster).await.status.is_none());
    }
}
