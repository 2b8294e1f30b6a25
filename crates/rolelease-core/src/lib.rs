//! # rolelease core
//!
//! Pure primitives for rolelease: grant records, history entries, the
//! grant/renew transition, policy constants, and remaining-time arithmetic.
//!
//! This crate contains no I/O, no storage, no timers. Everything takes the
//! current instant as an argument.
//!
//! ## Key Types
//!
//! - [`Grant`] - The single mutable row per `(subject, kind)`
//! - [`HistoryEntry`] - Immutable audit record of a grant or renewal
//! - [`GrantPolicy`] - Grant duration, reminder window, sweep period
//! - [`Remaining`] - Months/days/hours/minutes breakdown for display
//!
//! ## Instants
//!
//! All instants are Unix milliseconds (UTC) held in `i64`.

pub mod clock;
pub mod error;
pub mod grant;
pub mod policy;
pub mod types;

pub use clock::{format_instant, remaining, Clock, Remaining, SystemClock, DAY_MS, HOUR_MS, MINUTE_MS};
pub use error::{CoreError, PolicyError};
pub use grant::{apply_grant, Grant, GrantRequest, HistoryAction, HistoryEntry, Transition};
pub use policy::GrantPolicy;
pub use types::{ContextId, EntitlementKind, GrantKey, SubjectId};
