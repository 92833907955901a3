pub mod cluster;
pub mod ctx;
pub mod error;
pub mod finalizer;
#[cfg(feature = "manager")]
pub mod manager;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod meta;
pub mod registry;
pub mod store;
pub mod upsert;

pub use self::{
    cluster::{Cluster, Object},
    error::{Error, Result},
};
