#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`EngineConfig`] holds the few policy switches the engine reads at run
//! time. The active configuration is thread-scoped: it defaults lazily, can
//! be replaced with [`install`], and can be overridden for a scope with
//! [`EngineConfig::push`], which restores the previous configuration when the
//! returned guard drops.
//!
//! # Sources
//!
//! - [`EngineConfig::from_env`]: `SPRIG_COPY_POLICY` (`shallow`/`deep`),
//!   `SPRIG_DELAY_POLICY` (`store`/`all`), `SPRIG_MAX_REPLAY_ROUNDS`.
//!   Unparseable values are ignored with a warning.
//! - `EngineConfig::from_toml_str` (feature `policy-config`).

use std::cell::RefCell;
use std::env;
use std::rc::Rc;

thread_local! {
    static CURRENT: Rc<RefCell<Vec<EngineConfig>>> =
        Rc::new(RefCell::new(vec![EngineConfig::default()]));
}

const ENV_COPY_POLICY: &str = "SPRIG_COPY_POLICY";
const ENV_DELAY_POLICY: &str = "SPRIG_DELAY_POLICY";
const ENV_MAX_REPLAY_ROUNDS: &str = "SPRIG_MAX_REPLAY_ROUNDS";

/// How a one-way binding snapshots its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(rename_all = "lowercase"))]
pub enum CopyPolicy {
    /// Copy the top level only; nested objects are shared with the source.
    Shallow,
    /// Copy the whole graph so nested mutation in the source is not visible.
    #[default]
    Deep,
}

/// Which bindings defer notifications while their owner is inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(rename_all = "snake_case"))]
pub enum DelayPolicy {
    /// Only bindings backed by a store entry are delayed.
    #[default]
    StoreBackedOnly,
    /// Every binding owned by a component is delayed.
    AllBindings,
}

/// Policy switches read by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default))]
pub struct EngineConfig {
    pub copy_policy: CopyPolicy,
    pub delay_policy: DelayPolicy,
    /// Upper bound on dirty-replay rounds within one `update_dirty_elements`.
    pub max_replay_rounds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            copy_policy: CopyPolicy::Deep,
            delay_policy: DelayPolicy::StoreBackedOnly,
            max_replay_rounds: 16,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `SPRIG_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_COPY_POLICY) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "shallow" => config.copy_policy = CopyPolicy::Shallow,
                "deep" => config.copy_policy = CopyPolicy::Deep,
                _ => tracing::warn!(message = "config.invalid", key = ENV_COPY_POLICY, value = %raw),
            }
        }
        if let Some(raw) = lookup(ENV_DELAY_POLICY) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "store" | "store_backed_only" => {
                    config.delay_policy = DelayPolicy::StoreBackedOnly;
                }
                "all" | "all_bindings" => config.delay_policy = DelayPolicy::AllBindings,
                _ => tracing::warn!(message = "config.invalid", key = ENV_DELAY_POLICY, value = %raw),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_REPLAY_ROUNDS) {
            match raw.trim().parse::<u32>() {
                Ok(rounds) if rounds > 0 => config.max_replay_rounds = rounds,
                _ => {
                    tracing::warn!(message = "config.invalid", key = ENV_MAX_REPLAY_ROUNDS, value = %raw);
                }
            }
        }
        config
    }

    /// Parse a TOML document such as
    ///
    /// ```toml
    /// copy_policy = "shallow"
    /// delay_policy = "all_bindings"
    /// max_replay_rounds = 8
    /// ```
    ///
    /// Missing keys keep their defaults.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let config: Self = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    #[cfg(feature = "policy-config")]
    fn sanitized(mut self) -> Self {
        if self.max_replay_rounds == 0 {
            self.max_replay_rounds = Self::default().max_replay_rounds;
        }
        self
    }

    /// Override the active configuration until the guard drops.
    #[must_use = "dropping this guard restores the previous configuration"]
    pub fn push(self) -> ConfigOverride {
        let stack = CURRENT.with(Rc::clone);
        stack.borrow_mut().push(self);
        ConfigOverride { stack, config: self }
    }
}

/// RAII guard for a scoped configuration override.
#[must_use = "dropping this guard restores the previous configuration"]
pub struct ConfigOverride {
    stack: Rc<RefCell<Vec<EngineConfig>>>,
    config: EngineConfig,
}

impl Drop for ConfigOverride {
    fn drop(&mut self) {
        let mut stack = self.stack.borrow_mut();
        if stack.len() > 1 {
            let popped = stack.pop();
            debug_assert_eq!(popped, Some(self.config));
        }
    }
}

/// The active configuration.
#[must_use]
pub fn current() -> EngineConfig {
    CURRENT.with(|stack| stack.borrow().last().copied().unwrap_or_default())
}

/// Replace the base configuration. Scoped overrides stay on top.
pub fn install(config: EngineConfig) {
    CURRENT.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.first_mut() {
            Some(base) => *base = config,
            None => stack.push(config),
        }
    });
    tracing::debug!(message = "config.install", ?config);
}
