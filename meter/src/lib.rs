pub mod name_registry;
pub mod party_registry;
pub mod pipeline;
pub mod rolling;
pub mod session_meter;

pub use name_registry::NameRegistry;
pub use party_registry::PartyRegistry;
pub use pipeline::{FameTracker, Pipeline, PipelineSnapshot};
pub use rolling::{MeterSnapshot, RollingMeter, SourceTotals};
pub use session_meter::{CloseReason, Mode, SessionEntry, SessionMeter, SessionSummary};
