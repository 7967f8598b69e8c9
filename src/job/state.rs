use std::path::PathBuf;

use media_bus::frame::Thumbnail;
use serde::{Serialize, Serializer};

/// Observable state of a video job. Serialized as one JSON object per
/// state with a `state` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Initial,
    Initializing,
    InProgress {
        progress: f32,
        #[serde(rename = "thumbnail_bytes", serialize_with = "thumbnail_size")]
        thumbnail: Option<Thumbnail>,
    },
    PublishingSimulated {
        progress: f32,
    },
    Ready {
        path: PathBuf,
    },
    Error {
        message: String,
    },
}

impl JobState {
    /// Ready and Error are final until the job is retried.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobState::Ready { .. } | JobState::Error { .. })
    }
}

fn thumbnail_size<S: Serializer>(thumbnail: &Option<Thumbnail>, s: S) -> Result<S::Ok, S::Error> {
    match thumbnail {
        Some(thumbnail) => s.serialize_some(&thumbnail.jpeg.len()),
        None => s.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_state_tag() {
        let state = JobState::PublishingSimulated { progress: 0.5 };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"state":"publishing_simulated","progress":0.5}"#
        );
        assert_eq!(
            serde_json::to_string(&JobState::Initial).unwrap(),
            r#"{"state":"initial"}"#
        );
    }

    #[test]
    fn thumbnail_is_reported_by_size() {
        let state = JobState::InProgress {
            progress: 0.25,
            thumbnail: Some(Thumbnail {
                width: 2,
                height: 2,
                jpeg: vec![0u8; 10].into(),
            }),
        };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"state":"in_progress","progress":0.25,"thumbnail_bytes":10}"#
        );
    }

    #[test]
    fn only_ready_and_error_are_settled() {
        assert!(!JobState::Initializing.is_settled());
        assert!(JobState::Error {
            message: "boom".to_string()
        }
        .is_settled());
    }
}
