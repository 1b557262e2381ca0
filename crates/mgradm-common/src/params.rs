//! Deployment parameters accumulated across pipeline phases
//!
//! Each helm invocation receives the whole set. Keys are applied in insertion
//! order; setting an existing key replaces its value in place.

use std::fmt;

/// Server timezone
pub const TIMEZONE: &str = "timezone";
/// Forwarded SSH agent socket used by the migration scripts
pub const SSH_AGENT_SOCKET: &str = "migration.ssh.agentSocket";
/// SSH client configuration used by the migration scripts
pub const SSH_CONFIG_PATH: &str = "migration.ssh.configPath";
/// SSH known hosts used by the migration scripts
pub const SSH_KNOWN_HOSTS_PATH: &str = "migration.ssh.knownHostsPath";
/// Host directory mounted into the server for the generated scripts
pub const DATA_PATH: &str = "migration.dataPath";
/// Base64 encoded CA certificate carried over from the legacy server
pub const SSL_CA_CERT: &str = "ssl.ca.cert";
/// Base64 encoded CA key carried over from the legacy server
pub const SSL_CA_KEY: &str = "ssl.ca.key";

/// Keys whose values must never reach the logs
const SENSITIVE_KEYS: [&str; 1] = [SSL_CA_KEY];

/// Ordered key/value overrides plus the reset-to-defaults toggle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentParameters {
    reset_values: bool,
    values: Vec<(String, String)>,
}

impl DeploymentParameters {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameter set that resets the release values to the chart defaults
    pub fn reset() -> Self {
        Self {
            reset_values: true,
            values: Vec::new(),
        }
    }

    /// Whether the deployment starts from the chart defaults
    pub fn reset_values(&self) -> bool {
        self.reset_values
    }

    /// Set `key` to `value`, keeping the original position of an existing key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.values.push((key, value)),
        }
        self
    }

    /// Builder flavour of [`set`](Self::set)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Apply every override of `other` on top of this set
    pub fn extend(&mut self, other: &DeploymentParameters) -> &mut Self {
        self.reset_values |= other.reset_values;
        for (key, value) in &other.values {
            self.set(key.clone(), value.clone());
        }
        self
    }

    /// Value of `key`, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `key` is set
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All overrides in application order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of overrides
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no overrides
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as helm command line arguments
    pub fn to_helm_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.values.len() * 2 + 1);
        if self.reset_values {
            args.push("--reset-values".to_string());
        }
        for (key, value) in &self.values {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        args
    }
}

impl fmt::Display for DeploymentParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .to_helm_args()
            .iter()
            .map(|arg| redact_arg(arg))
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// Hide the value of a `key=value` argument when the key is sensitive
pub fn redact_arg(arg: &str) -> String {
    match arg.split_once('=') {
        Some((key, _)) if SENSITIVE_KEYS.contains(&key) => format!("{}=<redacted>", key),
        _ => arg.to_string(),
    }
}
