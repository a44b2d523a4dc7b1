use crate::output::UserOutput;
use tails_server::status::short_label;
use tails_server::ServiceRegistry;

pub async fn run_status(
    registry: &ServiceRegistry,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    registry.guess_statuses().await?;
    let report = registry.status_report()?;

    if json {
        out.status(&serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    out.status("Service Status:");
    out.status(&format!("{:-<60}", ""));
    if report.is_empty() {
        out.status("  No services configured");
        return Ok(());
    }
    for row in report {
        let marker = short_label(row.status).unwrap_or("");
        out.status(&format!("  {:<6} {:<16} {}", marker, row.name, row.label));
        if let Some(address) = row.address {
            out.status(&format!("         {}:{}", address, row.virtual_port));
        }
    }
    Ok(())
}

pub async fn run_info(
    registry: &ServiceRegistry,
    name: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let lifecycle = registry.get(name)?;
    let status = lifecycle.guess_status().await?;
    let service = lifecycle.service();

    out.status(&format!("{} ({})", service.name(), service.unit()));
    if let Some(description) = &service.descriptor().description {
        out.status(&format!("  {}", description));
    }
    out.status(&format!("  Status: {}", status.label()));

    if !lifecycle.is_installed()? {
        return Ok(());
    }
    match service.connection_info()? {
        Some(info) => {
            out.blank();
            for line in info.lines() {
                out.status(&format!("  {}", line));
            }
        }
        None => out.status("  No onion address yet"),
    }

    let options = service.option_values()?;
    if !options.is_empty() {
        out.blank();
        out.status("  Options:");
        for (option, value) in options {
            out.status(&format!(
                "    {:<20} {:<10} {}",
                option.name(),
                option.render(&value),
                option.description()
            ));
        }
    }
    Ok(())
}
