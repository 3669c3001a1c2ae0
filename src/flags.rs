//! Feature flags with per-user rollout.
//!
//! Flags are an ordinary value built at startup and passed into the
//! orchestrator; there is no process-wide registry. Percentage rollout
//! buckets users by a SHA-256 of their id so a user stays in or out of a
//! rollout across restarts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Routes the orchestrator may send text requests to the local agent.
pub const AGENT_WORKFLOW: &str = "agent_workflow";
/// Consult the routing advisor before the static policy.
pub const META_ROUTING: &str = "meta_routing";
/// Let stakeholders veto an ensemble decision.
pub const CONSENSUS_VOTING: &str = "consensus_voting";
/// Run the evaluate/refine loop after a workflow.
pub const QUALITY_REFINEMENT: &str = "quality_refinement";

/// Who a flag is enabled for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Rollout {
    All,
    None,
    /// Enabled for roughly `percent` of user ids (0-100).
    Percentage { percent: f32 },
    Whitelist { users: Vec<String> },
}

/// A single flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub enabled: bool,
    pub rollout: Rollout,
    #[serde(default)]
    pub description: String,
}

impl FeatureFlag {
    pub fn on(description: impl Into<String>) -> Self {
        Self {
            enabled: true,
            rollout: Rollout::All,
            description: description.into(),
        }
    }

    pub fn off(description: impl Into<String>) -> Self {
        Self {
            enabled: false,
            rollout: Rollout::None,
            description: description.into(),
        }
    }

    /// Whether the flag applies to `user_id`.
    ///
    /// Percentage and whitelist rollouts need a user id; anonymous
    /// callers are excluded from partial rollouts.
    pub fn is_enabled_for(&self, user_id: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.rollout {
            Rollout::All => true,
            Rollout::None => false,
            Rollout::Percentage { percent } => {
                user_id.is_some_and(|user| (user_bucket(user) as f32) < *percent)
            }
            Rollout::Whitelist { users } => {
                user_id.is_some_and(|user| users.iter().any(|u| u == user))
            }
        }
    }
}

fn user_bucket(user_id: &str) -> u8 {
    let digest = Sha256::digest(user_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head % 100) as u8
}

/// The set of flags consulted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    flags: BTreeMap<String, FeatureFlag>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        let mut flags = BTreeMap::new();
        flags.insert(
            AGENT_WORKFLOW.to_string(),
            FeatureFlag::on("Route implementation and complex text queries to the local agent"),
        );
        flags.insert(
            META_ROUTING.to_string(),
            FeatureFlag::on("Consult the routing advisor first"),
        );
        flags.insert(
            CONSENSUS_VOTING.to_string(),
            FeatureFlag::on("Stakeholder vote before committing to an ensemble"),
        );
        flags.insert(
            QUALITY_REFINEMENT.to_string(),
            FeatureFlag::on("Evaluate and refine answers below the quality bar"),
        );
        Self { flags }
    }
}

impl FeatureFlags {
    /// A flag set with nothing registered; every lookup is `false`.
    pub fn empty() -> Self {
        Self {
            flags: BTreeMap::new(),
        }
    }

    /// Unknown flags are disabled.
    pub fn is_enabled(&self, name: &str, user_id: Option<&str>) -> bool {
        self.flags
            .get(name)
            .is_some_and(|flag| flag.is_enabled_for(user_id))
    }

    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(name)
    }

    /// Register or replace a flag.
    pub fn insert(&mut self, name: impl Into<String>, flag: FeatureFlag) {
        self.flags.insert(name.into(), flag);
    }

    /// Turn a flag fully on or off, registering it if needed.
    pub fn set(&mut self, name: &str, enabled: bool) {
        let flag = self
            .flags
            .entry(name.to_string())
            .or_insert_with(|| FeatureFlag::off(""));
        flag.enabled = enabled;
        flag.rollout = if enabled { Rollout::All } else { Rollout::None };
        info!(flag = name, enabled, "Feature flag set");
    }

    /// Builder form of [`FeatureFlags::set`].
    pub fn with(mut self, name: &str, enabled: bool) -> Self {
        self.set(name, enabled);
        self
    }

    /// Switch a known flag to percentage rollout, clamped to 0-100.
    pub fn set_rollout_percentage(&mut self, name: &str, percent: f32) -> bool {
        match self.flags.get_mut(name) {
            Some(flag) => {
                flag.enabled = true;
                flag.rollout = Rollout::Percentage {
                    percent: percent.clamp(0.0, 100.0),
                };
                true
            }
            None => {
                warn!(flag = name, "Cannot set rollout for unknown flag");
                false
            }
        }
    }

    /// Apply `HLCS_FEATURE_<NAME>` overrides for every registered flag.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let names: Vec<String> = self.flags.keys().cloned().collect();
        for name in names {
            let key = format!("HLCS_FEATURE_{}", name.to_uppercase());
            let Some(raw) = lookup(&key) else {
                continue;
            };
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.set(&name, true),
                "false" | "0" | "no" | "off" => self.set(&name, false),
                other => warn!(key = %key, value = other, "Ignoring unrecognised flag value"),
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }
}
