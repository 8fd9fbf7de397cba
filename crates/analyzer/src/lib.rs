//! Asynchronous run analysis: a worker pool drains the analysis queue,
//! retrieves each run's log from the log store, truncates it to the
//! user's budget, calls the configured language model, and persists the
//! report on the run.

mod model;
mod prompt;
mod truncate;
mod worker;

pub use model::{Completion, CompletionRequest, ModelClient, OpenAiClient};
pub use prompt::build_user_prompt;
pub use truncate::truncate_lines;
pub use worker::Analyzer;
