use std::fmt;
use std::fs;
use std::path::PathBuf;

use base64::{engine::general_purpose, Engine as _};
use colored::Colorize;
use error_stack::{IntoReport, ResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;

#[derive(Debug)]
pub struct AuthError;
impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Auth error")
    }
}
impl std::error::Error for AuthError {}

pub type AuthResult<T> = error_stack::Result<T, AuthError>;

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const REDIRECT_URI: &str = "http://localhost:8888/callback";
const CREDENTIALS_FILE_NAME: &str = ".credentials.json";

/// Scopes the tool needs: read the saved library, read private playlists and
/// modify playlists of either visibility.
const SCOPES: &[&str] = &[
    "user-library-read",
    "playlist-read-private",
    "playlist-modify-private",
    "playlist-modify-public",
];

/// An authenticated client ready for API calls. The rest of the program only
/// ever sees this, never the credentials themselves.
#[derive(Debug, Clone)]
pub struct SpotifySession {
    client: reqwest::Client,
    access_token: String,
}

impl SpotifySession {
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    #[cfg(test)]
    pub(crate) fn unauthenticated() -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct CachedCredentials {
    refresh_token: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Authentication manager. Holds the app credentials and the path of the
/// cached refresh token in the app-data directory.
pub struct Auth {
    config: Config,
    credentials_path: PathBuf,
}

impl Auth {
    pub fn new(config: Config, appdata_dir: &std::path::Path) -> Self {
        Self {
            config,
            credentials_path: appdata_dir.join(CREDENTIALS_FILE_NAME),
        }
    }

    /// Returns an authenticated session, refreshing the cached token when one
    /// exists and walking through the browser login otherwise.
    pub async fn get_session(&self) -> AuthResult<SpotifySession> {
        let client = reqwest::Client::new();

        if let Some(cached) = self.read_cached_credentials() {
            log::info!("Refreshing cached access token");
            match self.refresh_token(&client, &cached.refresh_token).await {
                Ok(token) => {
                    if let Some(refresh_token) = token.refresh_token {
                        self.save_credentials(&refresh_token)?;
                    }
                    return Ok(SpotifySession {
                        client,
                        access_token: token.access_token,
                    });
                }
                Err(report) => {
                    log::warn!("Token refresh failed, falling back to login: {:?}", report);
                }
            }
        }

        let token = self.interactive_login(&client).await?;
        if let Some(refresh_token) = &token.refresh_token {
            self.save_credentials(refresh_token)?;
        }
        Ok(SpotifySession {
            client,
            access_token: token.access_token,
        })
    }

    /// Deletes the cached credentials file. Exits normally whether or not an
    /// account was logged in.
    pub fn logout(&self) {
        match fs::remove_file(&self.credentials_path) {
            Ok(()) => {
                println!("{}", "Successfully logged out of saved account".green());
                log::info!("Deleted credentials file, user logged out");
            }
            Err(_) => {
                println!("{}", "Not logged into any account".red());
                log::error!("Credentials file doesn't exist");
            }
        }
    }

    fn read_cached_credentials(&self) -> Option<CachedCredentials> {
        let contents = fs::read_to_string(&self.credentials_path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn save_credentials(&self, refresh_token: &str) -> AuthResult<()> {
        let cached = CachedCredentials {
            refresh_token: refresh_token.to_string(),
        };
        let serialized = serde_json::to_string_pretty(&cached)
            .into_report()
            .change_context(AuthError)?;
        fs::write(&self.credentials_path, serialized)
            .into_report()
            .attach_printable(format!(
                "Failed to write credentials file at {}",
                self.credentials_path.display()
            ))
            .change_context(AuthError)?;
        Ok(())
    }

    async fn refresh_token(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(client, &params).await
    }

    async fn exchange_code(
        &self,
        client: &reqwest::Client,
        code: &str,
    ) -> AuthResult<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
        ];
        self.token_request(client, &params).await
    }

    async fn token_request(
        &self,
        client: &reqwest::Client,
        params: &[(&str, &str)],
    ) -> AuthResult<TokenResponse> {
        let auth_string = format!("{}:{}", self.config.client_id, self.config.client_secret);
        let encoded_auth = general_purpose::STANDARD.encode(auth_string);

        let response = client
            .post(ACCOUNTS_TOKEN_URL)
            .header("Authorization", format!("Basic {}", encoded_auth))
            .form(params)
            .send()
            .await
            .into_report()
            .attach_printable("Token request to the Spotify accounts service failed")
            .change_context(AuthError)?
            .error_for_status()
            .into_report()
            .change_context(AuthError)?;
        response
            .json::<TokenResponse>()
            .await
            .into_report()
            .attach_printable("Failed to parse token response")
            .change_context(AuthError)
    }

    async fn interactive_login(&self, client: &reqwest::Client) -> AuthResult<TokenResponse> {
        let auth_url = format!(
            "https://accounts.spotify.com/authorize?response_type=code&client_id={}&scope={}&redirect_uri={}",
            self.config.client_id,
            SCOPES.join("%20"),
            REDIRECT_URI
        );

        println!(
            "\n{}\n",
            "Please log in to Spotify in the browser window that just opened.".yellow()
        );
        println!(
            "If it didn't open, please copy and paste this URL into your browser:\n{}",
            auth_url.cyan()
        );
        if webbrowser::open(&auth_url).is_err() {
            println!("Could not automatically open browser.");
        }

        let code = tokio::task::spawn_blocking(receive_callback_code)
            .await
            .into_report()
            .change_context(AuthError)??;

        self.exchange_code(client, &code).await
    }
}

/// Waits for the accounts service to redirect the browser back to the local
/// loopback listener, and extracts the authorization code.
fn receive_callback_code() -> AuthResult<String> {
    let server = tiny_http::Server::http("127.0.0.1:8888")
        .ok()
        .ok_or(AuthError)
        .into_report()
        .attach_printable("Could not bind the local callback server on port 8888")?;

    let request = server
        .recv()
        .into_report()
        .attach_printable("Failed to receive the callback request from the browser")
        .change_context(AuthError)?;
    let full_url = format!("http://localhost:8888{}", request.url());
    let parsed_url = Url::parse(&full_url)
        .into_report()
        .change_context(AuthError)?;
    let code = parsed_url
        .query_pairs()
        .find_map(|(key, value)| {
            if key == "code" {
                Some(value.into_owned())
            } else {
                None
            }
        })
        .ok_or(AuthError)
        .into_report()
        .attach_printable("Could not find 'code' in callback URL")?;

    let response = tiny_http::Response::from_string(
        "<h1>Authentication successful!</h1><p>You can close this browser tab now.</p>",
    );
    if let Err(err) = request.respond(response) {
        log::warn!("Failed to respond to the browser callback: {}", err);
    }
    Ok(code)
}
