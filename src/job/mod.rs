mod handler;
mod state;

pub use handler::{JobRequest, VideoJob};
pub use state::JobState;
