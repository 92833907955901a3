pub mod application;
pub mod project;
pub mod server;

use kalypso_core_k8s::Error;

const REASON_RECONCILIATION_FAILED: &str = "ReconciliationFailed";

/// Prefixes a child error with the step that produced it, keeping the
/// underlying kind visible to conflict detection.
fn step(message: impl Into<String>) -> impl FnOnce(Error) -> Error {
    let message = message.into();
    move |error| {
        let message = format!("{message}: {error}");
        error.context(message)
    }
}
