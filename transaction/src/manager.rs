//! Creates transactions over one backing map with shared settings.

use crate::backing::BackingMap;
use crate::transaction::{ConcurrencyStrategy, Isolation, Transaction};
use crate::validator::{SimpleValidator, Validator};

use std::env;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Overrides [`TransactionConfig::validate_locks`] when set.
pub const ENV_VALIDATE_LOCKS: &str = "TANDEM_TXN_VALIDATE_LOCKS";
/// Overrides [`TransactionConfig::lock_wait_millis`] when set.
pub const ENV_LOCK_WAIT_MS: &str = "TANDEM_TXN_LOCK_WAIT_MS";

// Lock owners must not collide across managers sharing a backing map.
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// The concurrency scheme a manager hands to new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConcurrencyMode {
  /// Lock at prepare, then validate.
  Optimistic,
  /// Lock on first write.
  #[default]
  Pessimistic,
  /// Optimistic, with locking left to the caller.
  External,
}

/// Settings shared by every transaction a manager creates.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransactionConfig {
  pub concurrency: ConcurrencyMode,
  pub isolation: Isolation,
  /// How long a lock request waits for another owner. `0` fails at once.
  pub lock_wait_millis: u64,
  /// Pessimistic prepare confirms each lock is still held.
  pub validate_locks: bool,
}

impl Default for TransactionConfig {
  fn default() -> Self {
    Self {
      concurrency: ConcurrencyMode::default(),
      isolation: Isolation::default(),
      lock_wait_millis: 0,
      validate_locks: true,
    }
  }
}

impl TransactionConfig {
  /// The default configuration with environment overrides applied.
  ///
  /// Unparseable values are logged and ignored.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Ok(raw) = env::var(ENV_VALIDATE_LOCKS) {
      match parse_flag(&raw) {
        Some(flag) => config.validate_locks = flag,
        None => warn!(var = ENV_VALIDATE_LOCKS, value = %raw, "ignoring unparseable flag"),
      }
    }
    if let Ok(raw) = env::var(ENV_LOCK_WAIT_MS) {
      match raw.trim().parse::<u64>() {
        Ok(millis) => config.lock_wait_millis = millis,
        Err(err) => warn!(var = ENV_LOCK_WAIT_MS, value = %raw, %err, "ignoring unparseable lock wait"),
      }
    }
    config
  }

  pub fn lock_wait(&self) -> Duration {
    Duration::from_millis(self.lock_wait_millis)
  }
}

fn parse_flag(raw: &str) -> Option<bool> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

/// Begins transactions against a shared backing map.
pub struct TransactionManager<K, V, B> {
  backing: Arc<B>,
  config: TransactionConfig,
  validator: Arc<dyn Validator<K, V>>,
}

impl<K, V, B> fmt::Debug for TransactionManager<K, V, B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransactionManager")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl<K, V, B> TransactionManager<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  B: BackingMap<K, V> + 'static,
{
  /// A manager with the default configuration and a [`SimpleValidator`].
  pub fn new(backing: Arc<B>) -> Self {
    Self::builder(backing).build()
  }

  pub fn builder(backing: Arc<B>) -> TransactionManagerBuilder<K, V, B> {
    TransactionManagerBuilder {
      backing,
      config: TransactionConfig::default(),
      validator: None,
    }
  }

  pub fn config(&self) -> &TransactionConfig {
    &self.config
  }

  pub fn backing(&self) -> &Arc<B> {
    &self.backing
  }

  /// Begins a transaction with the manager's configured settings.
  pub fn begin(&self) -> Transaction<K, V, B> {
    self.begin_with(self.config.concurrency, self.config.isolation)
  }

  /// Begins a transaction with explicit concurrency and isolation.
  pub fn begin_with(&self, concurrency: ConcurrencyMode, isolation: Isolation) -> Transaction<K, V, B> {
    let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
    let strategy = match concurrency {
      ConcurrencyMode::Optimistic | ConcurrencyMode::External => ConcurrencyStrategy::Optimistic {
        validator: self.validator.clone(),
        lock_external: concurrency == ConcurrencyMode::External,
      },
      ConcurrencyMode::Pessimistic => ConcurrencyStrategy::Pessimistic {
        validate_locks: self.config.validate_locks,
      },
    };
    debug!(tx = id, ?concurrency, ?isolation, "beginning transaction");
    Transaction::new(id, self.backing.clone(), strategy, isolation, self.config.lock_wait())
  }
}

/// Configures a [`TransactionManager`].
pub struct TransactionManagerBuilder<K, V, B> {
  backing: Arc<B>,
  config: TransactionConfig,
  validator: Option<Arc<dyn Validator<K, V>>>,
}

impl<K, V, B> TransactionManagerBuilder<K, V, B>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  B: BackingMap<K, V> + 'static,
{
  /// Replaces every setting with `config`.
  pub fn config(mut self, config: TransactionConfig) -> Self {
    self.config = config;
    self
  }

  pub fn concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
    self.config.concurrency = concurrency;
    self
  }

  pub fn isolation(mut self, isolation: Isolation) -> Self {
    self.config.isolation = isolation;
    self
  }

  pub fn lock_wait(mut self, wait: Duration) -> Self {
    self.config.lock_wait_millis = wait.as_millis().min(u64::MAX as u128) as u64;
    self
  }

  pub fn validate_locks(mut self, validate: bool) -> Self {
    self.config.validate_locks = validate;
    self
  }

  /// Sets the validator optimistic transactions run at prepare.
  pub fn validator<Val>(mut self, validator: Val) -> Self
  where
    Val: Validator<K, V> + 'static,
  {
    self.validator = Some(Arc::new(validator));
    self
  }

  pub fn build(self) -> TransactionManager<K, V, B> {
    let validator = match self.validator {
      Some(validator) => validator,
      None => Arc::new(SimpleValidator::new(self.backing.clone())),
    };
    TransactionManager {
      backing: self.backing,
      config: self.config,
      validator,
    }
  }
}
