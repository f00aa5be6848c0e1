pub mod constants;
pub mod keys;
pub mod logging;
pub mod progress;
pub mod retry;

pub use constants::*;
pub use keys::{default_target_date, is_gzip_key, is_raw_input_key, normalize_prefix, KeyLayout};
pub use progress::ProgressReporter;
pub use retry::{retry_with_backoff, RetryPolicy};
