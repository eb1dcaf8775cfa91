//! OpenAI client for video metadata completions and thumbnail images.

pub mod api;
pub mod thumbnail;

pub use api::{OpenAiApi, OpenAiError, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_IMAGE_MODEL};
pub use thumbnail::{THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH};
