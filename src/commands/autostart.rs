use crate::output::UserOutput;
use tails_server::ServiceRegistry;

/// Enable every installed autostart service and wait for all of them.
pub async fn run_autostart(
    registry: &ServiceRegistry,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    registry.guess_statuses().await?;
    let started = registry.autostart()?;
    if started.is_empty() {
        out.status("No services to autostart");
        return Ok(());
    }

    let mut failed = 0;
    for (name, task) in started {
        out.progress(&format!("  {:<16} ", name));
        match task.await? {
            Ok(()) => out.finish_progress("enabled"),
            Err(e) => {
                failed += 1;
                out.finish_progress("failed");
                out.error(&format!("    {}", e));
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} service(s) failed to autostart", failed);
    }
    Ok(())
}
