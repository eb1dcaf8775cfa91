//! Music-generation client for the CometAPI Suno endpoints.

pub mod api;
pub mod prompt;

pub use api::{MusicRequest, SunoApi, SunoError, DEFAULT_BASE_URL};
pub use prompt::create_lofi_prompt;
