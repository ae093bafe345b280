pub mod normalize;
pub mod process;

pub use process::IngestionProcess;
