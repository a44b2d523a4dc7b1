use crate::output::UserOutput;
use tails_server::status::StatusEvent;
use tails_server::ServiceRegistry;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Follow every unit until Ctrl-C, printing each status change.
pub async fn run_watch(
    registry: &ServiceRegistry,
    autostart: bool,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (handle, dispatch_task) = registry.dispatcher().start(cancel.clone());

    if let Err(e) = registry.guess_statuses().await {
        out.warning(&format!("Warning: {}", e));
    }
    if let Err(e) = registry.make_states_consistent().await {
        out.warning(&format!("Warning: {}", e));
    }
    if autostart {
        // Detached: failures are logged and shown as status changes
        for (name, _task) in registry.autostart()? {
            info!(service = %name, "Autostart requested");
        }
    }

    let watch_task = tokio::spawn(registry.watcher(handle).run(cancel.clone()));
    tokio::pin!(watch_task);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    out.status("Watching services. Press Ctrl-C to stop.");
    let watcher_result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                out.status("Stopping watch");
                break None;
            }
            joined = &mut watch_task => break Some(joined),
            Some(event) = events.recv() => out.status_event(&event),
        }
    };

    cancel.cancel();
    dispatch_task.await?;
    let watcher_result = match watcher_result {
        Some(joined) => joined,
        None => watch_task.await,
    };
    watcher_result??;
    Ok(())
}
