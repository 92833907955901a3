pub mod application;
pub mod monitoring;
pub mod project;
pub mod server;

pub mod consts {
    pub const GROUP: &str = "serving.serving.kalypso.io";

    pub const LABEL_APPLICATION: &str = "kalypso-serving.io/application";
    pub const LABEL_ENVIRONMENT: &str = "kalypso-serving.io/environment";
    pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const LABEL_PROJECT: &str = "kalypso-serving.io/project";
    pub const LABEL_TRITON_SERVER: &str = "kalypso-serving.io/tritonserver";

    pub const MANAGED_BY: &str = "kalypso-serving";
}
