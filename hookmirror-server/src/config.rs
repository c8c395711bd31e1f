use anyhow::{bail, Context, Result};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::github::DEFAULT_API_URL;

/// GitHub App credentials; the CI bridge is disabled without them.
#[derive(Clone)]
pub struct GitHubAppConfig {
    pub app_id: u64,
    pub private_key: String,
    pub api_url: String,
}

#[derive(Clone)]
pub struct Config {
    pub listen_address: IpAddr,
    pub port: u16,
    pub github_app: Option<GitHubAppConfig>,
    /// JSON file holding registered mirrors and CI bridges.
    pub registry_path: PathBuf,
    /// Working directory of the push script.
    pub data_dir: PathBuf,
    pub shell_command: String,
    pub shell_args: Vec<String>,
    /// Replaces the built-in push script when set.
    pub push_script_path: Option<PathBuf>,
    /// Bearer token for `/admin` and `/status`.
    /// If not set, those endpoints are disabled (return 403 Forbidden).
    pub admin_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_address = var("LISTEN_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse::<IpAddr>()
            .context("LISTEN_ADDRESS must be a valid IP address")?;

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let github_app = match (var("GITHUB_APP_ID"), var("GITHUB_PRIVATE_KEY")) {
            (Some(app_id), Some(private_key)) => Some(GitHubAppConfig {
                app_id: app_id
                    .parse::<u64>()
                    .context("GITHUB_APP_ID must be a valid number")?,
                private_key: private_key.replace("\\n", "\n"),
                api_url: var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            }),
            (None, None) => None,
            (Some(_), None) => bail!("GITHUB_PRIVATE_KEY is required when GITHUB_APP_ID is set"),
            (None, Some(_)) => bail!("GITHUB_APP_ID is required when GITHUB_PRIVATE_KEY is set"),
        };

        let registry_path = var("REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mirrors.json"));

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let shell_command = var("SHELL_COMMAND").unwrap_or_else(|| "bash".to_string());

        let shell_args = var("SHELL_ARGS")
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let push_script_path = var("PUSH_SCRIPT_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let admin_secret = parse_admin_secret(var("ADMIN_SECRET"));

        Ok(Config {
            listen_address,
            port,
            github_app,
            registry_path,
            data_dir,
            shell_command,
            shell_args,
            push_script_path,
            admin_secret,
        })
    }
}

/// Parse ADMIN_SECRET from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty secret never grants access.
pub fn parse_admin_secret(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.listen_address.to_string(), "0.0.0.0");
        assert!(config.github_app.is_none());
        assert_eq!(config.registry_path, PathBuf::from("mirrors.json"));
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.shell_command, "bash");
        assert!(config.shell_args.is_empty());
        assert!(config.push_script_path.is_none());
        assert!(config.admin_secret.is_none());
    }

    #[test]
    fn test_github_app() {
        let config = config(&[
            ("GITHUB_APP_ID", "1234"),
            ("GITHUB_PRIVATE_KEY", "-----BEGIN-----\\nabc\\n-----END-----"),
        ])
        .unwrap();
        let app = config.github_app.unwrap();
        assert_eq!(app.app_id, 1234);
        assert_eq!(app.private_key, "-----BEGIN-----\nabc\n-----END-----");
        assert_eq!(app.api_url, "https://api.github.com");
    }

    #[test]
    fn test_github_app_requires_both_values() {
        assert!(config(&[("GITHUB_APP_ID", "1")]).is_err());
        assert!(config(&[("GITHUB_PRIVATE_KEY", "k")]).is_err());
        assert!(config(&[("GITHUB_APP_ID", "x"), ("GITHUB_PRIVATE_KEY", "k")]).is_err());
    }

    #[test]
    fn test_shell_args_and_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("SHELL_COMMAND", "sh"),
            ("SHELL_ARGS", "-e  -x"),
            ("PUSH_SCRIPT_PATH", "/etc/hookmirror/push.sh"),
            ("ADMIN_SECRET", "admin"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.shell_command, "sh");
        assert_eq!(config.shell_args, vec!["-e", "-x"]);
        assert_eq!(
            config.push_script_path,
            Some(PathBuf::from("/etc/hookmirror/push.sh"))
        );
        assert_eq!(config.admin_secret.as_deref(), Some("admin"));
    }

    #[test]
    fn test_invalid_port() {
        assert!(config(&[("PORT", "http")]).is_err());
    }

    #[test]
    fn test_parse_admin_secret() {
        assert_eq!(parse_admin_secret(None), None);
        assert_eq!(parse_admin_secret(Some("".to_string())), None);
        assert_eq!(parse_admin_secret(Some(" \t\n".to_string())), None);
        assert_eq!(
            parse_admin_secret(Some("  token  ".to_string())),
            Some("  token  ".to_string())
        );
    }
}
