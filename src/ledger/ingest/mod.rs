pub mod analysis;
pub mod catalog;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod expr;
pub mod io;
pub mod logging;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod postprocess;

pub use error::{IngestError, Result};
