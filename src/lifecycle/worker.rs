use super::{OptionChange, ServiceLifecycle};
use crate::error::Result;
use crate::status::StatusOverride;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

impl ServiceLifecycle {
    pub fn spawn_install(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        self.spawn_operation("install", |lifecycle| async move { lifecycle.install_impl().await })
    }

    pub fn spawn_enable(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        self.spawn_operation("enable", |lifecycle| async move { lifecycle.enable_impl().await })
    }

    pub fn spawn_disable(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        self.spawn_operation("disable", |lifecycle| async move { lifecycle.disable_impl().await })
    }

    pub fn spawn_uninstall(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        self.spawn_operation("uninstall", |lifecycle| async move {
            lifecycle.uninstall_impl().await
        })
    }

    pub fn spawn_apply_options(
        self: &Arc<Self>,
        changes: Vec<OptionChange>,
    ) -> JoinHandle<Result<()>> {
        self.spawn_operation("apply_options", move |lifecycle| async move {
            lifecycle.apply_options_impl(changes).await
        })
    }

    /// Run an operation on its own task. The caller gets the handle and
    /// does not have to wait. The permit is held until the result has been
    /// settled.
    fn spawn_operation<F, Fut>(
        self: &Arc<Self>,
        operation: &'static str,
        run: F,
    ) -> JoinHandle<Result<()>>
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let lifecycle = Arc::clone(self);
        let span = tracing::info_span!("worker", service.name = %self.name(), operation);
        tokio::spawn(
            async move {
                let _permit = lifecycle.guard.acquire(operation).await;
                let result = run(Arc::clone(&lifecycle)).await;
                lifecycle.settle(operation, result)
            }
            .instrument(span),
        )
    }

    /// Publish a running but unpublished service and settle the outcome
    /// before the next transition may start.
    pub(crate) async fn repair_states(&self) -> Result<()> {
        let _permit = self.guard.acquire("make_states_consistent").await;
        let result = self.make_states_consistent_impl().await;
        self.settle("make_states_consistent", result)
    }

    /// Worker boundary. Unexpected failures force the error status and are
    /// logged, then handed back to whoever joins the task.
    fn settle(&self, operation: &str, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => info!("{} finished", operation),
            Err(e) if e.is_expected() => warn!(error = %e, "{} refused", operation),
            Err(e) => {
                error!(error = %e, "{} failed", operation);
                self.store().force(StatusOverride::Error);
            }
        }
        result
    }
}
