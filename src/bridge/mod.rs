pub mod bridge;
pub mod sources;

pub use bridge::StateSubscriptionBridge;
pub use sources::{Source, SourceMaps, SourceUpdate, SymbolState};
