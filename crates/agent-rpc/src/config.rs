//! Helper Process Launch Configuration

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use crate::error::{Result, RpcError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_PREFIX: &str = "HELPER_ENV_";

/// How to start the helper process
#[derive(Clone)]
pub struct LaunchConfig {
    pub command: String,
    pub args: Vec<String>,

    /// Extra environment for the child
    pub env: BTreeMap<String, String>,

    /// Account credentials; passed as environment, never logged
    credentials: BTreeMap<String, String>,

    /// Bound on every call
    pub call_timeout: Duration,

    /// Bound on the initialize exchange
    pub handshake_timeout: Duration,

    /// `clientInfo` announced in `initialize`
    pub client_name: String,
    pub client_version: String,
}

impl LaunchConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            credentials: BTreeMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            client_name: env!("CARGO_PKG_NAME").into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// Everything the child sees in its environment; credentials win on clashes.
    pub fn child_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .filter(|(key, _)| !self.credentials.contains_key(*key))
            .chain(&self.credentials)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `None` when `HELPER_COMMAND` is unset; the helper is optional.
    /// Variables that are not valid UTF-8 are skipped.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_vars(utf8_vars(std::env::vars_os()))
    }

    /// Reads `HELPER_COMMAND`, `HELPER_ARGS`, `HELPER_CALL_TIMEOUT_SECS`, and
    /// forwards every `HELPER_ENV_<NAME>` as `<NAME>`.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Option<Self>> {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let Some(command) = vars.get("HELPER_COMMAND").map(|c| c.trim()).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let mut config = Self::new(command);
        if let Some(args) = vars.get("HELPER_ARGS") {
            config.args = args.split_whitespace().map(String::from).collect();
        }
        if let Some(raw) = vars.get("HELPER_CALL_TIMEOUT_SECS") {
            let secs: u64 = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| RpcError::Config(format!("HELPER_CALL_TIMEOUT_SECS has invalid value '{raw}'")))?;
            config.call_timeout = Duration::from_secs(secs);
        }
        for (key, value) in &vars {
            if let Some(name) = key.strip_prefix(ENV_PREFIX).filter(|n| !n.is_empty()) {
                config.credentials.insert(name.to_string(), value.clone());
            }
        }

        Ok(Some(config))
    }
}

fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

impl fmt::Debug for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("call_timeout", &self.call_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect()
    }

    #[test]
    fn test_helper_is_optional() {
        assert!(LaunchConfig::from_vars(vars(&[("PATH", "/bin")])).unwrap().is_none());
    }

    #[test]
    fn test_from_vars_forwards_prefixed_env() {
        let config = LaunchConfig::from_vars(vars(&[
            ("HELPER_COMMAND", "node"),
            ("HELPER_ARGS", "  server.js   --stdio "),
            ("HELPER_CALL_TIMEOUT_SECS", "5"),
            ("HELPER_ENV_BROKER_TOKEN", "secret"),
            ("HELPER_ENV_", "ignored"),
            ("OTHER", "x"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(config.command, "node");
        assert_eq!(config.args, vec!["server.js", "--stdio"]);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.child_env().collect::<Vec<_>>(), vec![("BROKER_TOKEN", "secret")]);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        for raw in ["soon", "0", "-1"] {
            let err = LaunchConfig::from_vars(vars(&[("HELPER_COMMAND", "x"), ("HELPER_CALL_TIMEOUT_SECS", raw)]))
                .unwrap_err();
            assert!(matches!(err, RpcError::Config(_)), "{raw} should be rejected");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_environment_is_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = vec![
            (OsString::from("HELPER_COMMAND"), OsString::from("helper")),
            (OsString::from("HELPER_ENV_BAD"), OsString::from_vec(vec![0x66, 0xff, 0x6f])),
            (OsString::from_vec(vec![0xfe]), OsString::from("x")),
            (OsString::from("HELPER_ENV_GOOD"), OsString::from("ok")),
        ];
        let config = LaunchConfig::from_vars(utf8_vars(env)).unwrap().unwrap();
        assert_eq!(config.command, "helper");
        assert_eq!(config.child_env().collect::<Vec<_>>(), vec![("GOOD", "ok")]);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = LaunchConfig::new("helper").credential("API_SECRET", "hunter2");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("API_SECRET"));
        assert!(!rendered.contains("hunter2"));
    }
}
