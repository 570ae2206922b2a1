//! Delta-map transactions over a lockable concurrent map.
//!
//! A [`Transaction`] keeps its reads and writes in a private overlay and
//! applies them to the backing map only at commit. Two concurrency schemes
//! are offered:
//!
//! - **Pessimistic**: keys are locked as they are written (and, under
//!   repeatable read, as they are read). Prepare can re-check that no lock
//!   lease has lapsed.
//! - **Optimistic**: nothing is locked until prepare, which locks every
//!   enlisted key and then asks a [`Validator`] whether the values the
//!   transaction saw are still current.
//!
//! Any [`tandem_cache::Cache`] is a [`BackingMap`].

pub mod backing;
pub mod error;
pub mod keyset;
pub mod manager;
pub mod transaction;
pub mod validator;

pub use backing::BackingMap;
pub use error::{TxError, ValidationError};
pub use keyset::KeySet;
pub use manager::{ConcurrencyMode, TransactionConfig, TransactionManager, TransactionManagerBuilder};
pub use transaction::{ConcurrencyStrategy, Isolation, Transaction, TxStatus};
pub use validator::{SimpleValidator, TxView, Validator};
