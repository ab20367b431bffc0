//! rankscrape: retrieves university profile pages from a JavaScript-heavy
//! ranking site through a controlled Chromium, optionally carrying over a
//! logged-in session, and stores the rendered markup for offline parsing.

pub mod browser;
pub mod config;
pub mod orchestrator;
pub mod parser;
pub mod renderer;
pub mod resolver;
pub mod retriever;
pub mod session;
pub mod store;
pub mod types;
pub mod wait;

pub use browser::{BrowserController, ControllerState};
pub use config::ScraperConfig;
pub use orchestrator::{Orchestrator, RunMode};
pub use parser::{parse_page, ExtractedPage, PageRecord};
pub use resolver::EntityDirectory;
pub use retriever::PageRetriever;
pub use session::SessionState;
pub use store::DocumentStore;
pub use types::*;
