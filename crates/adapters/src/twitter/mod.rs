//! Twitter (X API v2) destination adapter

mod upload;
mod write;

pub use write::TwitterPoster;

/// Twitter poster settings
#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub base_url: String,
    /// Length at which the API starts rejecting messages
    pub max_chars: usize,
    pub enabled: bool,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            max_chars: 280,
            enabled: true,
        }
    }
}
