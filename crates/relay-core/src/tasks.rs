//! Spawning background work whose failures must be collected.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::errors::{Classified, FaultReporter};

/// Spawn a task and forward its error, if any, to `reporter`.
///
/// The task runs inside a `task` span named after `component` so its logs
/// stay attributable.
pub fn spawn_reported<F, E>(component: &'static str, reporter: FaultReporter, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Classified + Send + 'static,
{
    let span = tracing::debug_span!("task", component);
    tokio::spawn(
        async move {
            if let Err(err) = fut.await {
                reporter.report_error(component, &err);
            }
        }
        .instrument(span),
    )
}
