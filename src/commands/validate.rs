use crate::output::UserOutput;
use std::path::PathBuf;
use tails_server::config::CONFIG_FILE_NAME;
use tails_server::Parser as ConfigParser;

pub fn run_validate(config_path: Option<PathBuf>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let parser = ConfigParser::new();
    let config_path = if let Some(path) = config_path {
        path
    } else {
        match parser.find_config_file() {
            Ok(path) => path,
            Err(_) => {
                out.error("Error: No configuration file found");
                out.warning(&format!("\nSearched for {} in:", CONFIG_FILE_NAME));
                out.warning(&format!(
                    "  - Current directory: {}",
                    std::env::current_dir()?.display()
                ));
                out.warning("  - Parent directories up to root");
                return Err(anyhow::anyhow!("Configuration file not found"));
            }
        }
    };

    out.status(&format!("Validating {}...", config_path.display()));

    // load_config validates as well
    let config = match parser.load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            out.error("Configuration is invalid");
            return Err(e.into());
        }
    };
    let timings = config.timings()?;

    out.success("Configuration is valid");
    out.blank();
    out.status(&format!("State directory: {}", config.state_dir.display()));
    out.status(&format!("Tor bootstrapped target: {}", config.tor_bootstrapped_target));
    out.status(&format!(
        "Timeouts: supervisor {:?}, publication {:?}",
        timings.supervisor_timeout, timings.publish_timeout
    ));
    out.blank();
    out.status(&format!("Services: {}", config.services.len()));
    for service in &config.services {
        let order = if service.publish_before_starting {
            "publish first"
        } else {
            "start first"
        };
        out.status(&format!(
            "  - {} ({}, port {} -> {}, {})",
            service.name,
            service.systemd_unit,
            service.default_virtual_port(),
            service.default_target_port,
            order
        ));
        for option in &service.options {
            out.status(&format!("      {}", option.name()));
        }
    }
    Ok(())
}
