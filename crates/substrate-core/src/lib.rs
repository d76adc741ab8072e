//! substrate-core - Agent coordination substrate
//!
//! This crate provides:
//! - Lock, claim and zone ownership over a shared `SQLite` store
//! - Agent sessions and the versioned rules document
//! - The policy engine behind `substrate.check`
//! - Stale lease reclamation and the violation log

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod claim;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod policy;
pub mod reclaim;
pub mod rules;
pub mod session;
pub mod store;
pub mod substrate;
pub mod violations;
pub mod zone;

pub use claim::{Claim, ClaimManager, ClaimOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use lock::{Lock, LockManager, LockOutcome, LockValidity, ReleaseOutcome};
pub use paths::PathMatching;
pub use policy::{Action, PolicyEngine, RuleCheck, RuleId, Severity, Verdict};
pub use reclaim::{StaleCleaned, StaleReclaimer};
pub use rules::{Rules, RulesStore};
pub use session::{Holdings, Session, SessionEnd, SessionInit, SessionManager, SessionState};
pub use store::Store;
pub use substrate::Substrate;
pub use violations::{RuleFailure, ViolationLog, ViolationRecord};
pub use zone::{Zone, ZoneConflict, ZoneManager};
