use super::lifecycle::follow;
use crate::output::UserOutput;
use tails_server::lifecycle::OptionChange;
use tails_server::status::StatusEvent;
use tails_server::ServiceRegistry;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn run_get_option(
    registry: &ServiceRegistry,
    service: &str,
    option: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    // Unmasked on purpose, unlike `info`
    let (_, value) = registry.get(service)?.get_option(option)?;
    out.status(&value.to_string());
    Ok(())
}

pub async fn run_set_option(
    registry: &ServiceRegistry,
    service: &str,
    option: &str,
    value: &str,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lifecycle = registry.get(service)?;
    if !lifecycle.is_installed()? {
        return Err(tails_server::Error::NotInstalled(service.to_string()).into());
    }
    let parsed = lifecycle.service().option(option)?.parse_value(value)?;
    let change = OptionChange::Set(option.to_string(), parsed);
    apply(registry, service, change, events, out).await?;

    let (option, value) = lifecycle.get_option(option)?;
    out.success(&format!("{} {} = {}", service, option.name(), option.render(&value)));
    Ok(())
}

pub async fn run_reset_option(
    registry: &ServiceRegistry,
    service: &str,
    option: &str,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    apply(registry, service, OptionChange::Reset(option.to_string()), events, out).await?;

    let (option, value) = registry.get(service)?.get_option(option)?;
    out.success(&format!(
        "{} {} reset to {}",
        service,
        option.name(),
        option.render(&value)
    ));
    Ok(())
}

async fn apply(
    registry: &ServiceRegistry,
    service: &str,
    change: OptionChange,
    events: &mut UnboundedReceiver<StatusEvent>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lifecycle = registry.get(service)?;
    lifecycle.guess_status().await?;
    follow(lifecycle.spawn_apply_options(vec![change]), events, out).await
}
