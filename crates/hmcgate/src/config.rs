//! CLI configuration: `hmcgate_config` loading plus `GlobalOpts` overrides.
//!
//! Flags are the last layer: defaults, file, `HMCGATE_*` env, then flags.

use hmcgate_config::{Config, config_path, load_config};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load configuration and apply flag overrides.
///
/// An explicit `--config` path must exist; the default location may not.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    if let Some(ref path) = global.config {
        if !path.exists() {
            return Err(CliError::NoConfig {
                path: path.display().to_string(),
            });
        }
    }

    let mut config = load_config(global.config.as_deref())?;
    apply_overrides(&mut config, global);
    Ok(config)
}

fn apply_overrides(config: &mut Config, global: &GlobalOpts) {
    if let Some(ref addr) = global.srv_addr {
        config.server.addr.clone_from(addr);
    }
    if let Some(port) = global.srv_port {
        config.server.port = port;
    }
    if let Some(ref name) = global.hmc_name {
        config.hmc.name.clone_from(name);
    }
    if let Some(ref hostname) = global.hmc_hostname {
        config.hmc.hostname.clone_from(hostname);
    }
    if let Some(ref url) = global.hmc_url {
        config.hmc.url = Some(url.clone());
    }
    if let Some(ref user) = global.hmc_user {
        config.hmc.user = Some(user.clone());
    }
    if global.tls_skip_verify {
        config.hmc.tls_skip_verify = true;
    }
}

/// Path shown by `config path`.
pub fn display_path(global: &GlobalOpts) -> String {
    global
        .config
        .clone()
        .unwrap_or_else(config_path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    #[test]
    fn flags_override_loaded_values() {
        let cli = Cli::parse_from([
            "hmcgate",
            "--srv-port",
            "8080",
            "--hmc-hostname",
            "hmc2",
            "--hmc-user",
            "viewer",
            "-k",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli.global);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.hmc.hostname, "hmc2");
        assert_eq!(config.hmc.user.as_deref(), Some("viewer"));
        assert!(config.hmc.tls_skip_verify);
        assert_eq!(config.server.addr, "0.0.0.0");
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let cli = Cli::parse_from(["hmcgate", "--config", "/nonexistent/hmcgate.toml"]);
        let err = load(&cli.global).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }
}
