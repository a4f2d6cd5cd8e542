use wb_domain::config::{Config, ConfigSeverity};

/// Print every validation issue.  Returns `false` when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML, followed
/// by which secret variables are present in the environment.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");

    println!("\n# environment");
    for (name, present) in secret_status(config) {
        println!("# {name}: {}", if present { "set" } else { "unset" });
    }
    Ok(())
}

/// Secret env vars referenced by the config and whether each is set.
/// Values are never printed.
fn secret_status(config: &Config) -> Vec<(String, bool)> {
    let mut names = vec![
        config.server.api_token_env.clone(),
        config.whatsapp.access_token_env.clone(),
        config.whatsapp.verify_token_env.clone(),
        config.whatsapp.app_secret_env.clone(),
    ];
    if let Some(token_env) = &config.processing.token_env {
        names.push(token_env.clone());
    }
    names
        .into_iter()
        .map(|name| {
            let present = std::env::var(&name).map(|v| !v.is_empty()).unwrap_or(false);
            (name, present)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        assert!(validate(&Config::default(), "config.toml"));
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut config = Config::default();
        config.buffering.workers = 0;
        assert!(!validate(&config, "config.toml"));
    }

    #[test]
    fn secret_status_lists_processing_token_when_configured() {
        let mut config = Config::default();
        config.processing.token_env = Some("WB_TEST_UNSET_PROCESSING_TOKEN".into());

        let status = secret_status(&config);
        assert_eq!(status.len(), 5);
        assert_eq!(
            status.last(),
            Some(&("WB_TEST_UNSET_PROCESSING_TOKEN".to_string(), false))
        );
    }
}
