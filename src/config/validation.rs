use super::{Config, ServiceDescriptor};
use crate::error::{Error, Result};
use crate::service::options::{check_text, ServiceOption};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const UNIT_SUFFIXES: &[&str] = &[".service", ".target", ".socket"];

fn service_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("static regex pattern is valid")
    })
}

impl Config {
    /// Validate the configuration. Every problem found is reported, not just
    /// the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.timings() {
            errors.push(e);
        }
        if !has_unit_suffix(&self.tor_bootstrapped_target) {
            errors.push(Error::Validation(format!(
                "tor_bootstrapped_target '{}' is not a systemd unit name",
                self.tor_bootstrapped_target
            )));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                errors.push(Error::Validation(format!(
                    "Service '{}' is defined more than once",
                    service.name
                )));
            }
            validate_service(service, &mut errors);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

fn has_unit_suffix(unit: &str) -> bool {
    UNIT_SUFFIXES
        .iter()
        .any(|suffix| unit.len() > suffix.len() && unit.ends_with(suffix))
}

fn validate_service(service: &ServiceDescriptor, errors: &mut Vec<Error>) {
    let name = &service.name;

    if !service_name_pattern().is_match(name) {
        errors.push(Error::Validation(format!(
            "Service name '{}' must be lowercase letters, digits, '-' or '_'",
            name
        )));
    }

    if !has_unit_suffix(&service.systemd_unit) {
        errors.push(Error::Validation(format!(
            "Service '{}' has invalid systemd_unit '{}'. Expected one of: {}",
            name,
            service.systemd_unit,
            UNIT_SUFFIXES.join(", ")
        )));
    }

    if service.default_target_port == 0 {
        errors.push(Error::Validation(format!(
            "Service '{}' has default_target_port 0",
            name
        )));
    }
    if service.virtual_port == Some(0) {
        errors.push(Error::Validation(format!(
            "Service '{}' has virtual_port 0",
            name
        )));
    }

    if matches!(service.install.as_deref(), Some(cmd) if cmd.trim().is_empty()) {
        errors.push(Error::Validation(format!(
            "Service '{}' has an empty install command",
            name
        )));
    }

    let mut option_names = HashSet::new();
    for option in &service.options {
        if !option_names.insert(option.name()) {
            errors.push(Error::Validation(format!(
                "Service '{}' declares option '{}' more than once",
                name,
                option.name()
            )));
        }
        if let ServiceOption::Text { default, .. } = option {
            if let Err(e) = check_text(option.name(), default) {
                errors.push(Error::Validation(format!("Service '{}': {}", name, e)));
            }
        }
    }
}
