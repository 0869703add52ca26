// ABOUTME: Config scaffolding for new bastions.
// ABOUTME: Creates jumpgate.yml and an empty credentials file.

use std::path::Path;

use crate::error::{Error, Result};
use humantime_serde::re::humantime::format_duration;

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let config = Config::template();
    std::fs::write(&config_path, generate_template_yaml(&config))?;

    let credentials_path = dir.join(&config.credentials);
    if !credentials_path.exists() {
        std::fs::write(&credentials_path, CREDENTIALS_TEMPLATE)?;
    }

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    format!(
        r#"listen: {}
host_key: {}
credentials: {}
inactivity_timeout: {}
auth_rejection_time: {}
outbound:
  keepalive_interval: {}
  keepalive_max: {}
"#,
        config.listen,
        config.host_key.display(),
        config.credentials.display(),
        format_duration(config.inactivity_timeout),
        format_duration(config.auth_rejection_time),
        format_duration(config.outbound.keepalive_interval),
        config.outbound.keepalive_max,
    )
}

const CREDENTIALS_TEMPLATE: &str = r#"# Password the bastion uses for each target, literal or { env: VAR }
passwords: {}
#   db.internal:22: { env: DB_SSH_PASSWORD }

# Pinned host key per target (ssh-keygen -lf <host key>.pub)
host_keys: {}
#   db.internal:22: "SHA256:..."

# Caller keys allowed per target (jumpgate fingerprint <key.pub>)
acl: []
#   - key: "SHA256:..."
#     target: db.internal:22
"#;
