#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::uninlined_format_args,
    clippy::unused_self
)]

pub mod bot;
pub mod config;
pub mod discord;
pub mod extract;
pub mod instagram;
pub mod store;
pub mod sync;

pub use config::Config;
