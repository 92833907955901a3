use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{instrument, Level};

use crate::error::{Error, Result};

/// Raw access to the platform's object storage.
///
/// Every write carries the resource version of the object it was derived
/// from; a stale version fails with [`Error::Conflict`].
#[async_trait]
pub trait ObjectStore
where
    Self: Send + Sync,
{
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replaces the spec and metadata of an object; its status is untouched.
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Writes the status subresource of an object.
    async fn replace_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str)
        -> Result<()>;
}

pub(crate) fn name_of(object: &DynamicObject) -> Result<String> {
    object
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingField("metadata.name"))
}

/// [`ObjectStore`] backed by a live API server.
#[derive(Clone)]
pub struct KubeStore {
    kube: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(kube: Client, field_manager: impl Into<String>) -> Self {
        Self {
            kube,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.kube.clone(), namespace, resource),
            None => Api::all_with(self.kube.clone(), resource),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    #[instrument(level = Level::DEBUG, skip(self, resource), fields(kind = %resource.kind), err(Display))]
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(Into::into)
    }

    #[instrument(level = Level::DEBUG, skip(self, resource), fields(kind = %resource.kind), err(Display))]
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.api(resource, namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(Into::into)
    }

    #[instrument(level = Level::DEBUG, skip_all, fields(kind = %resource.kind, name = object.name_any()), err(Display))]
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.api(resource, namespace)
            .create(&self.post_params(), object)
            .await
            .map_err(Into::into)
    }

    #[instrument(level = Level::DEBUG, skip_all, fields(kind = %resource.kind, name = object.name_any()), err(Display))]
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;
        self.api(resource, namespace)
            .replace(&name, &self.post_params(), object)
            .await
            .map_err(Into::into)
    }

    #[instrument(level = Level::DEBUG, skip_all, fields(kind = %resource.kind, name = object.name_any()), err(Display))]
    async fn replace_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = name_of(object)?;

        // the resource version turns the merge patch into a compare-and-swap
        let patch = Patch::Merge(json!({
            "apiVersion": resource.api_version,
            "kind": resource.kind,
            "metadata": {
                "resourceVersion": object.metadata.resource_version,
            },
            "status": object.data.get("status"),
        }));
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api(resource, namespace)
            .patch_status(&name, &pp, &patch)
            .await
            .map_err(Into::into)
    }

    #[instrument(level = Level::DEBUG, skip(self, resource), fields(kind = %resource.kind), err(Display))]
    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}
