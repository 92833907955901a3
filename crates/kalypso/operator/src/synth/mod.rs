//! Pure mappings from a resource's spec to the children it owns.

pub mod observability;
pub mod project;
pub mod server;

use std::collections::BTreeMap;

use kalypso_api::consts::{
    LABEL_APPLICATION, LABEL_ENVIRONMENT, LABEL_MANAGED_BY, LABEL_PROJECT, LABEL_TRITON_SERVER,
    MANAGED_BY,
};
use maplit::btreemap;

pub fn environment_labels(project: &str, environment: &str) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_PROJECT.into() => project.into(),
        LABEL_ENVIRONMENT.into() => environment.into(),
        LABEL_MANAGED_BY.into() => MANAGED_BY.into(),
    }
}

pub fn server_labels(server: &str, application: &str) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_TRITON_SERVER.into() => server.into(),
        LABEL_APPLICATION.into() => application.into(),
        LABEL_MANAGED_BY.into() => MANAGED_BY.into(),
    }
}

/// Pods of a server are matched by its name alone, so moving a server to
/// another application keeps the selector stable.
pub fn server_selector(server: &str) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_TRITON_SERVER.into() => server.into(),
    }
}
