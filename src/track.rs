use std::fmt;

use error_stack::ResultExt;

use crate::dates::{bucket_of, MonthBucket};

#[derive(Debug)]
pub struct TrackError;
impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Track error")
    }
}
impl std::error::Error for TrackError {}

pub type TrackResult<T> = error_stack::Result<T, TrackError>;

/// One saved track from the user's library. The owning month bucket is
/// derived from `added_at` once at construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub added_at: String,
    pub uri: String,
    bucket: MonthBucket,
}

impl Track {
    pub fn new(
        title: String,
        artist: String,
        added_at: String,
        uri: String,
    ) -> TrackResult<Self> {
        let bucket = bucket_of(&added_at)
            .attach_printable(format!(
                "Saved track '{}' has an invalid added_at timestamp",
                title
            ))
            .change_context(TrackError)?;
        Ok(Self {
            title,
            artist,
            added_at,
            uri,
            bucket,
        })
    }

    pub fn bucket(&self) -> &MonthBucket {
        &self.bucket
    }

    /// Web link for the track, e.g. https://open.spotify.com/track/<id>.
    pub fn open_url(&self) -> String {
        match self.uri.rsplit(':').next() {
            Some(id) => format!("https://open.spotify.com/track/{}", id),
            None => self.uri.clone(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.title, self.artist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_derives_bucket_at_construction() {
        let track = Track::new(
            "Luminary Ones".to_string(),
            "Jarryd James".to_string(),
            "2023-08-04T10:30:00Z".to_string(),
            "spotify:track:4uLU6hMCjMI75M1A2tKUQC".to_string(),
        )
        .unwrap();
        assert_eq!(track.bucket(), &MonthBucket::new("August", "2023"));
    }

    #[test]
    fn test_track_rejects_malformed_added_at() {
        let result = Track::new(
            "Broken".to_string(),
            "Nobody".to_string(),
            "04/08/2023".to_string(),
            "spotify:track:xyz".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_open_url() {
        let track = Track::new(
            "Luminary Ones".to_string(),
            "Jarryd James".to_string(),
            "2023-08-04T10:30:00Z".to_string(),
            "spotify:track:4uLU6hMCjMI75M1A2tKUQC".to_string(),
        )
        .unwrap();
        assert_eq!(
            track.open_url(),
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"
        );
    }
}
