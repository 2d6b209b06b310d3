use async_trait::async_trait;
use thiserror::Error;

pub mod api;
pub mod cache;

/// Gateway failure taxonomy. Connectivity failures get their own kind so the
/// binary can report them with a distinct message; everything else is an API
/// or decoding failure. The core never retries on its own.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Cannot connect to Spotify servers")]
    Connectivity,
    #[error("Spotify API request failed")]
    Api,
    #[error("Unexpected response from the Spotify API")]
    Malformed,
}

pub type GatewayResult<T> = error_stack::Result<T, GatewayError>;

/// The remote API accepts at most this many items per add/remove call.
pub const MAX_ITEMS_PER_CALL: usize = 100;

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: String,
}

/// A playlist as listed in the user's library.
#[derive(Debug, Clone)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,
}

/// One saved-library entry as returned by the remote catalog, before it is
/// parsed into a [`crate::track::Track`].
#[derive(Debug, Clone)]
pub struct SavedTrackRecord {
    pub title: String,
    pub artist: String,
    pub added_at: String,
    pub uri: String,
}

/// One item inside a playlist; only the URI matters for membership checks.
#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub uri: String,
}

/// Positions of a duplicated URI to remove from a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRemoval {
    pub uri: String,
    pub positions: Vec<usize>,
}

/// Capability interface over the remote music catalog. Read operations return
/// fully paginated collections and are cached by the implementation; the
/// saved-playlists cache can be bypassed once a playlist has been created
/// during the run.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn current_user(&self) -> GatewayResult<CurrentUser>;

    async fn saved_tracks(&self) -> GatewayResult<Vec<SavedTrackRecord>>;

    async fn saved_playlists(&self, bypass_cache: bool) -> GatewayResult<Vec<PlaylistRef>>;

    async fn playlist_items(&self, playlist_id: &str) -> GatewayResult<Vec<PlaylistEntry>>;

    async fn create_playlist(
        &self,
        owner: &str,
        name: &str,
        public: bool,
        description: &str,
    ) -> GatewayResult<PlaylistRef>;

    /// Adds up to 100 URIs to a playlist. Callers are responsible for
    /// chunking larger additions.
    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> GatewayResult<()>;

    async fn playlist_snapshot(&self, playlist_id: &str) -> GatewayResult<String>;

    /// Removes specific occurrences by position, guarded by the playlist's
    /// current snapshot id.
    async fn remove_occurrences(
        &self,
        playlist_id: &str,
        removals: &[TrackRemoval],
        snapshot_id: &str,
    ) -> GatewayResult<()>;
}
