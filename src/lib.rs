pub mod cli;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod readers;
pub mod settings;
pub mod storage;
pub mod utils;
pub mod writers;

pub use error::{ProcessingError, Result};
pub use models::{PipelineStatus, Stage};
pub use pipeline::Pipeline;
pub use settings::Settings;
