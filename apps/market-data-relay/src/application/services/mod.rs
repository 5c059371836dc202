//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`Relay`]: single-writer task owning all relay state
//! - [`ConnectionManager`]: upstream connection state machine
//! - [`GapRepair`]: post-reconnect history replay
//! - [`StatusBoard`]: read-only view for the health endpoint

pub mod backfill;
pub mod connection;
pub mod relay;
pub mod status;
pub mod timer;

pub use backfill::{BackfillConfig, BackfillPlan, BackfillSummary, BackfillTick, GapRepair};
pub use connection::{ConnectionManager, UpstreamAction};
pub use relay::{Relay, RelayCommand, RelayError, RelayHandle, RelayOptions};
pub use status::{RelaySnapshot, StatusBoard};
pub use timer::SingleSlotTimer;
