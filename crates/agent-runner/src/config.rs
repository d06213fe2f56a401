//! Runner settings read from the environment

use anyhow::Context;
use agent_core::reasoning::DEFAULT_MAX_ROUNDS;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful automation agent. Use the available tools when they help answer the request.";

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub agent_id: String,
    pub system_prompt: String,
    pub max_rounds: usize,
}

impl RunnerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let max_rounds = match lookup("AGENT_MAX_ROUNDS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("AGENT_MAX_ROUNDS has invalid value '{raw}'"))?,
            None => DEFAULT_MAX_ROUNDS,
        };

        Ok(Self {
            agent_id: lookup("AGENT_ID").unwrap_or_else(|| "cli".into()),
            system_prompt: lookup("AGENT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            max_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_vars(|_| None).unwrap();
        assert_eq!(config.agent_id, "cli");
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
    }

    #[test]
    fn test_invalid_round_ceiling() {
        let err = RunnerConfig::from_vars(|key| (key == "AGENT_MAX_ROUNDS").then(|| "many".to_string()));
        assert!(err.is_err());
    }
}
