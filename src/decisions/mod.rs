//! Decision ledger: append-only, namespaced project decisions.
//!
//! Decisions are grouped by prefix (`GEN`, `BACK`, `FRONT`, ...) and numbered
//! per prefix (`BACK-01`, `BACK-02`, ...). Numbers are never reused: the
//! per-prefix counters are persisted and survive both restarts and checkpoint
//! rollback.
//!
//! ## Example
//!
//! ```
//! use waypoint::decisions::DecisionStore;
//!
//! let mut store = DecisionStore::new();
//! let first = store.append("BACK", "Use PostgreSQL", "Relational data").unwrap();
//! let second = store.append("BACK", "Use sqlx", "Compile-time checked queries").unwrap();
//! assert_eq!(first, "BACK-01");
//! assert_eq!(second, "BACK-02");
//!
//! let replacement = store.supersede(&first, "Use SQLite").unwrap();
//! assert_eq!(replacement, "BACK-03");
//! assert_eq!(store.list(Some("BACK")).len(), 3);
//! assert_eq!(store.current(Some("BACK")).len(), 2);
//! ```

mod markdown;
mod store;

pub use markdown::{load_from_dir, parse_decision_file, render_decision_file, save_to_dir};
pub use store::{Decision, DecisionSnapshot, DecisionStore, format_id, parse_id, validate_prefix};

/// Prefix of the general decisions every specialist round builds on.
pub const GENERAL_PREFIX: &str = "GEN";
