pub mod notifier;
pub mod orchestrator;

pub use notifier::{Notifier, RunReport, StoreNotifier, TracingNotifier};
pub use orchestrator::Pipeline;
