use std::time::Duration;

use error_stack::Report;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::auth::SpotifySession;
use crate::spotify::cache::{TtlCell, TtlMap};
use crate::spotify::{
    CurrentUser, Gateway, GatewayError, GatewayResult, PlaylistEntry, PlaylistRef,
    SavedTrackRecord, TrackRemoval, MAX_ITEMS_PER_CALL,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const PAGE_LIMIT: u32 = 50;
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Serialize, Deserialize, Debug)]
struct Paging<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ApiArtist {
    name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ApiTrack {
    name: String,
    uri: String,
    artists: Vec<ApiArtist>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct SavedTrackItem {
    added_at: String,
    track: Option<ApiTrack>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ApiPlaylist {
    id: String,
    name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct ApiTrackRef {
    uri: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct PlaylistItemEntry {
    track: Option<ApiTrackRef>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ApiUser {
    id: String,
    display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct SnapshotResponse {
    snapshot_id: String,
}

/// Classifies a transport error: connect failures and timeouts are
/// connectivity problems, everything else is an API failure.
fn classify(err: reqwest::Error) -> Report<GatewayError> {
    let kind = if err.is_connect() || err.is_timeout() {
        GatewayError::Connectivity
    } else {
        GatewayError::Api
    };
    Report::new(err).change_context(kind)
}

/// Gateway over the Spotify Web API. One instance is constructed per run and
/// owns its caches; nothing here is process-global.
pub struct SpotifyApi {
    session: SpotifySession,
    user_cache: OnceCell<CurrentUser>,
    saved_tracks_cache: TtlCell<Vec<SavedTrackRecord>>,
    saved_playlists_cache: TtlCell<Vec<PlaylistRef>>,
    playlist_items_cache: TtlMap<String, Vec<PlaylistEntry>>,
}

impl SpotifyApi {
    pub fn new(session: SpotifySession) -> Self {
        Self {
            session,
            user_cache: OnceCell::new(),
            saved_tracks_cache: TtlCell::new(CACHE_TTL),
            saved_playlists_cache: TtlCell::new(CACHE_TTL),
            playlist_items_cache: TtlMap::new(CACHE_TTL),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> GatewayResult<T> {
        let response = self
            .session
            .request(Method::GET, url)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;
        response
            .json::<T>()
            .await
            .map_err(|err| Report::new(err).change_context(GatewayError::Malformed))
    }

    /// Follows continuation cursors until the collection is exhausted.
    async fn get_all_pages<T: DeserializeOwned>(&self, first_url: String) -> GatewayResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next_url = Some(first_url);
        while let Some(url) = next_url {
            let page: Paging<T> = self.get_json(&url).await?;
            items.extend(page.items);
            next_url = page.next;
        }
        Ok(items)
    }

    async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
    ) -> GatewayResult<reqwest::Response> {
        self.session
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)
    }

    async fn fetch_saved_tracks(&self) -> GatewayResult<Vec<SavedTrackRecord>> {
        log::info!("Starting user saved tracks fetch");
        let items: Vec<SavedTrackItem> = self
            .get_all_pages(format!("{}/me/tracks?limit={}", API_BASE, PAGE_LIMIT))
            .await?;
        log::info!("Ending user saved tracks fetch");
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let track = item.track?;
                Some(SavedTrackRecord {
                    title: track.name,
                    artist: track
                        .artists
                        .first()
                        .map(|artist| artist.name.clone())
                        .unwrap_or_default(),
                    added_at: item.added_at,
                    uri: track.uri,
                })
            })
            .collect())
    }

    async fn fetch_saved_playlists(&self) -> GatewayResult<Vec<PlaylistRef>> {
        log::info!("Starting user saved playlists fetch");
        let items: Vec<ApiPlaylist> = self
            .get_all_pages(format!("{}/me/playlists?limit={}", API_BASE, PAGE_LIMIT))
            .await?;
        log::info!("Ending user saved playlists fetch");
        Ok(items
            .into_iter()
            .map(|playlist| PlaylistRef {
                id: playlist.id,
                name: playlist.name,
            })
            .collect())
    }

    async fn fetch_playlist_items(&self, playlist_id: &str) -> GatewayResult<Vec<PlaylistEntry>> {
        log::info!("Starting playlist item fetch, id: {}", playlist_id);
        let items: Vec<PlaylistItemEntry> = self
            .get_all_pages(format!(
                "{}/playlists/{}/tracks?limit={}",
                API_BASE, playlist_id, PAGE_LIMIT
            ))
            .await?;
        log::info!("Ending playlist item fetch, id: {}", playlist_id);
        Ok(items
            .into_iter()
            .filter_map(|entry| entry.track?.uri.map(|uri| PlaylistEntry { uri }))
            .collect())
    }
}

#[async_trait::async_trait]
impl Gateway for SpotifyApi {
    async fn current_user(&self) -> GatewayResult<CurrentUser> {
        self.user_cache
            .get_or_try_init(|| async {
                let user: ApiUser = self.get_json(&format!("{}/me", API_BASE)).await?;
                Ok(CurrentUser {
                    display_name: user.display_name.unwrap_or_else(|| user.id.clone()),
                    id: user.id,
                })
            })
            .await
            .cloned()
    }

    async fn saved_tracks(&self) -> GatewayResult<Vec<SavedTrackRecord>> {
        self.saved_tracks_cache
            .get_or_fetch(false, self.fetch_saved_tracks())
            .await
    }

    async fn saved_playlists(&self, bypass_cache: bool) -> GatewayResult<Vec<PlaylistRef>> {
        self.saved_playlists_cache
            .get_or_fetch(bypass_cache, self.fetch_saved_playlists())
            .await
    }

    async fn playlist_items(&self, playlist_id: &str) -> GatewayResult<Vec<PlaylistEntry>> {
        self.playlist_items_cache
            .get_or_fetch(
                &playlist_id.to_string(),
                self.fetch_playlist_items(playlist_id),
            )
            .await
    }

    async fn create_playlist(
        &self,
        owner: &str,
        name: &str,
        public: bool,
        description: &str,
    ) -> GatewayResult<PlaylistRef> {
        log::info!("Creating playlist {}", name);
        let body = serde_json::json!({
            "name": name,
            "public": public,
            "collaborative": false,
            "description": description,
        });
        let response = self
            .send_json(
                Method::POST,
                &format!("{}/users/{}/playlists", API_BASE, owner),
                &body,
            )
            .await?;
        let playlist: ApiPlaylist = response
            .json()
            .await
            .map_err(|err| Report::new(err).change_context(GatewayError::Malformed))?;
        // The cached playlist list no longer reflects the library.
        self.saved_playlists_cache.invalidate();
        Ok(PlaylistRef {
            id: playlist.id,
            name: playlist.name,
        })
    }

    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> GatewayResult<()> {
        if uris.len() > MAX_ITEMS_PER_CALL {
            return Err(Report::new(GatewayError::Api).attach_printable(format!(
                "add_items called with {} uris, the API accepts at most {} per call",
                uris.len(),
                MAX_ITEMS_PER_CALL
            )));
        }
        let body = serde_json::json!({ "uris": uris });
        self.send_json(
            Method::POST,
            &format!("{}/playlists/{}/tracks", API_BASE, playlist_id),
            &body,
        )
        .await?;
        Ok(())
    }

    async fn playlist_snapshot(&self, playlist_id: &str) -> GatewayResult<String> {
        let snapshot: SnapshotResponse = self
            .get_json(&format!(
                "{}/playlists/{}?fields=snapshot_id",
                API_BASE, playlist_id
            ))
            .await?;
        Ok(snapshot.snapshot_id)
    }

    async fn remove_occurrences(
        &self,
        playlist_id: &str,
        removals: &[TrackRemoval],
        snapshot_id: &str,
    ) -> GatewayResult<()> {
        if removals.len() > MAX_ITEMS_PER_CALL {
            return Err(Report::new(GatewayError::Api).attach_printable(format!(
                "remove_occurrences called with {} items, the API accepts at most {} per call",
                removals.len(),
                MAX_ITEMS_PER_CALL
            )));
        }
        let tracks: Vec<serde_json::Value> = removals
            .iter()
            .map(|removal| {
                serde_json::json!({
                    "uri": removal.uri,
                    "positions": removal.positions,
                })
            })
            .collect();
        let body = serde_json::json!({
            "tracks": tracks,
            "snapshot_id": snapshot_id,
        });
        self.send_json(
            Method::DELETE,
            &format!("{}/playlists/{}/tracks", API_BASE, playlist_id),
            &body,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_deserializes() {
        let json = r#"{
            "items": [
                {"added_at": "2023-08-04T10:30:00Z", "track": {
                    "name": "Luminary Ones",
                    "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                    "artists": [{"name": "Jarryd James"}]
                }},
                {"added_at": "2023-08-05T11:00:00Z", "track": null}
            ],
            "next": "https://api.spotify.com/v1/me/tracks?offset=50&limit=50"
        }"#;
        let page: Paging<SavedTrackItem> = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items[1].track.is_none());
        assert!(page.next.is_some());
    }

    #[tokio::test]
    async fn test_oversized_calls_are_rejected_before_sending() {
        let api = SpotifyApi::new(crate::auth::SpotifySession::unauthenticated());

        let uris: Vec<String> = (0..101).map(|n| format!("spotify:track:t{}", n)).collect();
        let result = api.add_items("pl1", &uris).await;
        assert!(matches!(
            result.unwrap_err().current_context(),
            GatewayError::Api
        ));

        let removals: Vec<TrackRemoval> = (0..101)
            .map(|n| TrackRemoval {
                uri: format!("spotify:track:t{}", n),
                positions: vec![n],
            })
            .collect();
        let result = api.remove_occurrences("pl1", &removals, "snapshot-1").await;
        assert!(matches!(
            result.unwrap_err().current_context(),
            GatewayError::Api
        ));
    }

    #[test]
    fn test_playlist_entry_skips_local_files() {
        let json = r#"{
            "items": [
                {"track": {"uri": "spotify:track:abc"}},
                {"track": {"uri": null}},
                {"track": null}
            ],
            "next": null
        }"#;
        let page: Paging<PlaylistItemEntry> = serde_json::from_str(json).unwrap();
        let uris: Vec<String> = page
            .items
            .into_iter()
            .filter_map(|entry| entry.track?.uri)
            .collect();
        assert_eq!(uris, ["spotify:track:abc"]);
    }
}
