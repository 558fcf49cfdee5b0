//! Server settings read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agent_core::compaction::DEFAULT_THRESHOLD;
use agent_core::orchestrator::DEFAULT_RECURSION_LIMIT;
use anyhow::{bail, Context};

/// Where thread history lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadStore {
    Memory,
    None,
    File(PathBuf),
}

impl FromStr for ThreadStore {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            "" | "memory" => Ok(Self::Memory),
            "none" => Ok(Self::None),
            other => match other.strip_prefix("file:") {
                Some(dir) if !dir.is_empty() => Ok(Self::File(PathBuf::from(dir))),
                _ => bail!("THREAD_STORE must be memory, none or file:<dir>, got '{}'", other),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind_addr: String,
    pub primary_model: String,
    pub compaction_model: String,
    pub compaction_threshold: usize,
    pub recursion_limit: usize,
    pub model_timeout: Duration,
    pub thread_store: ThreadStore,
    pub store_degrade: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let primary_model = get("PRIMARY_MODEL").unwrap_or_else(|| "llama3.2".into());
        let compaction_model = get("COMPACTION_MODEL").unwrap_or_else(|| primary_model.clone());

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            primary_model,
            compaction_model,
            compaction_threshold: parse_or(get("COMPACTION_THRESHOLD"), "COMPACTION_THRESHOLD", DEFAULT_THRESHOLD)?,
            recursion_limit: parse_or(get("RECURSION_LIMIT"), "RECURSION_LIMIT", DEFAULT_RECURSION_LIMIT)?,
            model_timeout: Duration::from_secs(parse_or(get("MODEL_TIMEOUT_SECS"), "MODEL_TIMEOUT_SECS", 120)?),
            thread_store: get("THREAD_STORE").as_deref().unwrap_or("memory").parse()?,
            store_degrade: parse_or(get("STORE_DEGRADE"), "STORE_DEGRADE", true)?,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map_or(Ok(default), |v| {
        v.trim().parse().with_context(|| format!("Invalid {}: '{}'", key, v))
    })
}
