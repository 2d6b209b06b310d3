use std::fmt;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use error_stack::fmt::{Charset, ColorMode};
use error_stack::{Report, ResultExt};

use crate::auth::Auth;
use crate::config::{appdata_dir, Config};
use crate::dialoguer::Dialoguer;
use crate::ledger::PlaylistLedger;
use crate::run_state::RunState;
use crate::sorter::{MonthSorter, SorterError, SorterOptions};
use crate::spotify::api::SpotifyApi;
use crate::spotify::GatewayError;

mod auth;
mod config;
mod dates;
mod dialoguer;
mod ledger;
mod run_state;
mod sorter;
mod spotify;
mod track;

#[derive(Debug)]
pub struct MonthSortError;
impl fmt::Display for MonthSortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Month sort error")
    }
}
impl std::error::Error for MonthSortError {}

pub type MonthSortResult<T> = error_stack::Result<T, MonthSortError>;

/// Sorts saved Spotify tracks into monthly playlists
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Sorts saved Spotify tracks by month saved")]
struct Cli {
    /// Spotify app client id, overrides the config file
    #[clap(long)]
    client_id: Option<String>,

    /// Spotify app client secret, overrides the config file
    #[clap(long)]
    client_secret: Option<String>,

    /// Logout of currently logged in account
    #[clap(long)]
    logout: bool,

    /// Set created playlists to public
    #[clap(long)]
    public: bool,

    /// Show the sort log in reverse order
    #[clap(long)]
    reverse: bool,

    /// Skips playlist generation automatically
    #[clap(long, conflicts_with = "create_playlists")]
    skip_playlist_creation: bool,

    /// Forces playlist generation
    #[clap(long)]
    create_playlists: bool,

    /// Number of concurrent workers
    #[clap(long, default_value_t = sorter::MAX_WORKERS)]
    workers: usize,

    /// Remove duplicate occurrences of tracks from the given playlist, then exit
    #[clap(long, value_name = "PLAYLIST_ID")]
    clean_playlist: Option<String>,
}

pub struct Suggestion(pub String);

impl Suggestion {
    pub fn set_report() {
        Report::set_charset(Charset::Utf8);
        Report::set_color_mode(ColorMode::Color);
        Report::install_debug_hook::<Self>(|Self(value), context| {
            context.push_body(format!("{}: {value}", "suggestion".yellow()))
        });
    }
}

async fn run(cli: Cli) -> MonthSortResult<()> {
    let appdata = appdata_dir().change_context(MonthSortError)?;
    let config = Config::resolve(cli.client_id.clone(), cli.client_secret.clone())
        .change_context(MonthSortError)?;
    let auth = Auth::new(config, &appdata);

    if cli.logout {
        auth.logout();
        return Ok(());
    }

    let session = auth.get_session().await.change_context(MonthSortError)?;
    let gateway = SpotifyApi::new(session);
    let ledger = PlaylistLedger::load(&appdata);
    let run_state = RunState::load(&appdata);
    let options = SorterOptions {
        skip_playlist_creation: cli.skip_playlist_creation,
        force_playlist_creation: cli.create_playlists,
        make_public: cli.public,
        reverse_log: cli.reverse,
        workers: cli.workers.max(1),
    };
    let mut sorter = MonthSorter::new(gateway, ledger, run_state, options);

    if let Some(playlist_id) = &cli.clean_playlist {
        sorter
            .clean_playlist(playlist_id)
            .await
            .change_context(MonthSortError)?;
        return Ok(());
    }

    sorter
        .run(|prompt| Dialoguer::confirm(prompt.to_string()).change_context(SorterError))
        .await
        .change_context(MonthSortError)?;
    Ok(())
}

fn is_connectivity_error(report: &Report<MonthSortError>) -> bool {
    report.frames().any(|frame| {
        matches!(
            frame.downcast_ref::<GatewayError>(),
            Some(GatewayError::Connectivity)
        )
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    colog::init();
    let cli = Cli::parse();

    Suggestion::set_report();

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Exiting...");
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            if is_connectivity_error(&report) {
                eprintln!(
                    "{}",
                    "Cannot connect to Spotify servers, please check your internet connection and try again"
                        .red()
                );
            }
            eprintln!("{:?}", report);
            ExitCode::FAILURE
        }
    }
}
