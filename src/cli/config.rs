//! Engine configuration and the deployment file read by the commands.
//!
//! `EngineConfig` holds the tunables; `EngineFile` adds the accounts and
//! strategies to load at startup. Signing seeds never live in the file:
//! each seeded signer names an environment variable (`.env` is honoured).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::delegation::{DelegationKind, DelegationLink, LocalKeyring};
use crate::execution::ExecutorSettings;
use crate::resilience::RetryPolicy;
use crate::simulation::SimulationConfig;
use crate::strategy::NewStrategy;
use crate::types::{AccountId, Address};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Environment variable {0} is not set")]
    MissingSecret(String),

    #[error("Bad signing seed in {var}: {reason}")]
    BadSeed { var: String, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Engine tunables. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between evaluation cycles
    pub evaluation_interval_secs: u64,
    /// Snapshots older than this skip the whole cycle
    pub max_snapshot_age_secs: i64,
    /// Tolerance for snapshots stamped ahead of the local clock
    pub max_clock_skew_secs: i64,
    /// How long after a scheduled occurrence a time-based trigger may still fire
    pub time_window_secs: i64,
    /// Retries against the execution layer
    pub retry: RetryPolicy,
    /// Retries against the delegation store and ledger sinks
    pub persistence_retry: RetryPolicy,
    pub submission_timeout_ms: u64,
    /// Wait per pending submission during reconciliation
    pub reconcile_poll_timeout_ms: u64,
    /// Failures in a row tolerated before a strategy is deactivated
    pub consecutive_failure_threshold: u32,
    /// Slippage applied by the paper execution layer
    pub paper_slippage_bps: Decimal,
    pub simulation: SimulationConfig,
    pub health_port: Option<u16>,
    /// CSV audit export for ledger records
    pub ledger_csv: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            max_snapshot_age_secs: 300,
            max_clock_skew_secs: 5,
            time_window_secs: 3600,
            retry: RetryPolicy::default(),
            persistence_retry: RetryPolicy::persistence(),
            submission_timeout_ms: 30_000,
            reconcile_poll_timeout_ms: 1_000,
            consecutive_failure_threshold: 3,
            paper_slippage_bps: dec!(10),
            simulation: SimulationConfig::default(),
            health_port: None,
            ledger_csv: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_interval_secs == 0 {
            return Err(invalid("evaluation_interval_secs", "must be positive"));
        }
        if self.max_snapshot_age_secs <= 0 {
            return Err(invalid("max_snapshot_age_secs", "must be positive"));
        }
        if self.max_clock_skew_secs < 0 {
            return Err(invalid("max_clock_skew_secs", "must not be negative"));
        }
        if self.time_window_secs <= 0 {
            return Err(invalid("time_window_secs", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.persistence_retry.max_attempts == 0 {
            return Err(invalid("persistence_retry.max_attempts", "must be at least 1"));
        }
        if self.submission_timeout_ms == 0 {
            return Err(invalid("submission_timeout_ms", "must be positive"));
        }
        if self.paper_slippage_bps < Decimal::ZERO {
            return Err(invalid("paper_slippage_bps", "must not be negative"));
        }
        if self.simulation.fee_bps < Decimal::ZERO || self.simulation.network_fee < Decimal::ZERO {
            return Err(invalid("simulation", "fees must not be negative"));
        }
        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn time_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.time_window_secs)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            retry: self.retry.clone(),
            submission_timeout: Duration::from_millis(self.submission_timeout_ms),
            reconcile_poll_timeout: Duration::from_millis(self.reconcile_poll_timeout_ms),
            consecutive_failure_threshold: self.consecutive_failure_threshold,
        }
    }

    /// Simulation settings sharing the engine's fire window.
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            time_window_secs: self.time_window_secs,
            ..self.simulation.clone()
        }
    }
}

/// One signer of a delegation account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignerSpec {
    /// Key held locally; the hex seed is read from this environment variable
    Seeded { seed_env: String },
    /// Signs elsewhere; only its address is known
    External { address: Address },
}

/// A delegation account to create at startup. The first signer is the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSpec {
    pub id: AccountId,
    pub kind: DelegationKind,
    pub signers: Vec<SignerSpec>,
    pub threshold: u32,
}

impl AccountSpec {
    /// Resolve every signer to an address, loading seeded keys into `keyring`.
    pub fn resolve_signers(&self, keyring: &mut LocalKeyring) -> Result<Vec<Address>, ConfigError> {
        self.signers
            .iter()
            .map(|signer| match signer {
                SignerSpec::External { address } => Ok(address.clone()),
                SignerSpec::Seeded { seed_env } => {
                    let seed = std::env::var(seed_env)
                        .map_err(|_| ConfigError::MissingSecret(seed_env.clone()))?;
                    keyring
                        .insert_hex_seed(&seed)
                        .map_err(|e| ConfigError::BadSeed {
                            var: seed_env.clone(),
                            reason: e.to_string(),
                        })
                }
            })
            .collect()
    }
}

/// Deployment description: engine settings plus accounts and strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineFile {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub strategies: Vec<NewStrategy>,
    /// Delegation chains to record in the delegation store
    #[serde(default)]
    pub delegations: Vec<Vec<DelegationLink>>,
}

impl EngineFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let parsed: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Parse {
                path: display,
                source,
            })?;
        parsed.engine.validate()?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_is_default_config() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = EngineConfig {
            evaluation_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "evaluation_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_clock_skew() {
        let config = EngineConfig {
            max_clock_skew_secs: -1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_clock_skew_secs",
                ..
            })
        ));
        assert_eq!(EngineConfig::default().max_clock_skew_secs, 5);
    }

    #[test]
    fn test_simulation_config_uses_engine_window() {
        let config = EngineConfig {
            time_window_secs: 900,
            ..Default::default()
        };
        assert_eq!(config.simulation_config().time_window_secs, 900);
    }

    #[test]
    fn test_load_engine_file() {
        let external = "ab".repeat(32);
        let json = format!(
            r#"{{
                "engine": {{ "evaluation_interval_secs": 5 }},
                "accounts": [{{
                    "id": "treasury",
                    "kind": "multisig",
                    "signers": [{{ "seed_env": "AUTOPILOT_TEST_SEED_A" }}, {{ "address": "{}" }}],
                    "threshold": 2
                }}],
                "strategies": [{{
                    "account_id": "treasury",
                    "name": "weekly dca",
                    "trigger": {{ "type": "time_based", "frequency": "weekly", "day": "Mon", "time": "09:00" }},
                    "action": {{ "type": "buy", "asset": "ETH", "amount": 50, "currency": "USD" }}
                }}]
            }}"#,
            external
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = EngineFile::load(file.path()).unwrap();
        assert_eq!(loaded.engine.evaluation_interval_secs, 5);
        assert_eq!(loaded.engine.max_snapshot_age_secs, 300);
        assert_eq!(loaded.accounts.len(), 1);
        assert_eq!(loaded.accounts[0].kind, DelegationKind::Multisig);
        assert!(matches!(loaded.accounts[0].signers[1], SignerSpec::External { .. }));
        assert_eq!(loaded.strategies.len(), 1);
        assert!(loaded.strategies[0].is_active);
        assert!(loaded.delegations.is_empty());
    }

    #[test]
    fn test_seeded_signer_reads_environment() {
        std::env::set_var("AUTOPILOT_TEST_SEED_RESOLVE", "07".repeat(32));
        let spec = AccountSpec {
            id: AccountId::new("a"),
            kind: DelegationKind::Single,
            signers: vec![SignerSpec::Seeded {
                seed_env: "AUTOPILOT_TEST_SEED_RESOLVE".into(),
            }],
            threshold: 1,
        };
        let mut keyring = LocalKeyring::new();
        let signers = spec.resolve_signers(&mut keyring).unwrap();
        assert_eq!(signers.len(), 1);
        assert_eq!(keyring.len(), 1);

        let missing = AccountSpec {
            signers: vec![SignerSpec::Seeded {
                seed_env: "AUTOPILOT_TEST_SEED_UNSET".into(),
            }],
            ..spec
        };
        assert!(matches!(
            missing.resolve_signers(&mut keyring),
            Err(ConfigError::MissingSecret(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = EngineFile::load(Path::new("/nonexistent/autopilot.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
