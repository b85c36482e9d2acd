#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::uninlined_format_args
)]

pub mod agent;
pub mod channels;
pub mod config;
pub mod history;
pub mod prompt;
pub mod providers;
pub mod sessions;
pub mod tools;

pub use config::Config;
