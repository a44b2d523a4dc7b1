use crate::output::UserOutput;
use std::sync::Arc;
use tails_server::error::Result as ServerResult;
use tails_server::lifecycle::ServiceLifecycle;
use tails_server::status::StatusEvent;
use tails_server::ServiceRegistry;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Enable,
    Disable,
    Uninstall,
}

impl Operation {
    fn spawn(self, lifecycle: &Arc<ServiceLifecycle>) -> JoinHandle<ServerResult<()>> {
        match self {
            Operation::Install => lifecycle.spawn_install(),
            Operation::Enable => lifecycle.spawn_enable(),
            Operation::Disable => lifecycle.spawn_disable(),
            Operation::Uninstall => lifecycle.spawn_uninstall(),
        }
    }

    fn done(self) -> &'static str {
        match self {
            Operation::Install => "installed",
            Operation::Enable => "enabled",
            Operation::Disable => "disabled",
            Operation::Uninstall => "uninstalled",
        }
    }
}

/// Run one lifecycle operation on a worker task and print status changes
/// while it runs.
pub async fn run_operation(
    registry: &ServiceRegistry,
    name: &str,
    operation: Operation,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lifecycle = registry.get(name)?;
    lifecycle.guess_status().await?;

    let task = operation.spawn(lifecycle);
    follow(task, events, out).await?;

    out.success(&format!("{} {}", name, operation.done()));
    if operation == Operation::Enable {
        if let Some(info) = lifecycle.service().connection_info()? {
            out.blank();
            out.status(&info);
        }
    }
    Ok(())
}

/// Print events until `task` finishes, then drain what is left.
pub async fn follow(
    task: JoinHandle<ServerResult<()>>,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    tokio::pin!(task);
    let result = loop {
        tokio::select! {
            Some(event) = events.recv() => out.status_event(&event),
            joined = &mut task => break joined,
        }
    };
    while let Ok(event) = events.try_recv() {
        out.status_event(&event);
    }
    result??;
    Ok(())
}
