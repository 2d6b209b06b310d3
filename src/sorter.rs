use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Local;
use colored::Colorize;
use error_stack::{IntoReport, Report, ResultExt};
use futures_util::{stream, StreamExt, TryStreamExt};

use crate::dates::{names_equal, sort_chronologically, MonthBucket};
use crate::ledger::PlaylistLedger;
use crate::run_state::RunState;
use crate::spotify::{CurrentUser, Gateway, PlaylistRef, TrackRemoval};
use crate::track::Track;
use crate::Suggestion;

#[derive(Debug)]
pub struct SorterError;
impl fmt::Display for SorterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Playlist sorter error")
    }
}
impl std::error::Error for SorterError {}

pub type SorterResult<T> = error_stack::Result<T, SorterError>;

pub const MAX_WORKERS: usize = 10;

/// Chunk size for additions and removals, matching the gateway's per-call
/// item limit.
pub const MAX_ITEMS_PER_REQUEST: usize = crate::spotify::MAX_ITEMS_PER_CALL;

#[derive(Debug, Clone)]
pub struct SorterOptions {
    pub skip_playlist_creation: bool,
    pub force_playlist_creation: bool,
    pub make_public: bool,
    pub reverse_log: bool,
    pub workers: usize,
}

impl Default for SorterOptions {
    fn default() -> Self {
        Self {
            skip_playlist_creation: false,
            force_playlist_creation: false,
            make_public: false,
            reverse_log: false,
            workers: MAX_WORKERS,
        }
    }
}

/// Whether the creation phase should execute this pass. Exactly one policy
/// applies per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationDecision {
    Run,
    Skip,
    /// Generation already happened this month; ask the user.
    Prompt,
}

pub fn creation_decision(
    month_passed: bool,
    ledger_loaded: bool,
    options: &SorterOptions,
) -> CreationDecision {
    if options.force_playlist_creation {
        return CreationDecision::Run;
    }
    // A new month with no live ledger always regenerates, even when the
    // skip flag is set; the ledger is the only proof the playlists exist.
    if month_passed && !ledger_loaded {
        return CreationDecision::Run;
    }
    if options.skip_playlist_creation {
        return CreationDecision::Skip;
    }
    let monthly_ran = !month_passed && ledger_loaded;
    if monthly_ran {
        CreationDecision::Prompt
    } else {
        CreationDecision::Run
    }
}

/// Result of one worker's playlist-creation task, aggregated by the
/// coordinator after the whole phase joins.
#[derive(Debug)]
struct CreationOutcome {
    name: String,
    created: bool,
    log: String,
}

/// Result of sorting one bucket's tracks into its playlist.
#[derive(Debug)]
struct BucketSortReport {
    name: String,
    added: usize,
    lines: Vec<String>,
}

/// The synchronization engine: reconciles month buckets against the user's
/// playlists, creates what is missing and sorts saved tracks into each
/// monthly playlist.
pub struct MonthSorter<G: Gateway> {
    gateway: G,
    ledger: PlaylistLedger,
    run_state: RunState,
    options: SorterOptions,
    user: Option<CurrentUser>,
    tracks: Vec<Track>,
    buckets: Vec<MonthBucket>,
    resolved: Vec<(MonthBucket, String)>,
    created_any: bool,
}

impl<G: Gateway> MonthSorter<G> {
    pub fn new(
        gateway: G,
        ledger: PlaylistLedger,
        run_state: RunState,
        options: SorterOptions,
    ) -> Self {
        Self {
            gateway,
            ledger,
            run_state,
            options,
            user: None,
            tracks: Vec::new(),
            buckets: Vec::new(),
            resolved: Vec::new(),
            created_any: false,
        }
    }

    /// Full pipeline: user info, saved tracks, bucket derivation, playlist
    /// creation, name-to-id resolution and track sorting. The last-run
    /// timestamp is only written once everything completed.
    pub async fn run<F>(&mut self, confirm: F) -> SorterResult<usize>
    where
        F: Fn(&str) -> SorterResult<bool>,
    {
        log::info!("Starting playlist sort run");
        self.starting().await?;
        self.load_saved_tracks().await?;
        self.generate_buckets();
        self.create_monthly_playlists(confirm).await?;
        self.resolve_playlist_ids().await?;
        let total = self.sort_all_tracks().await?;
        self.run_state
            .mark_complete(Local::now().naive_local())
            .change_context(SorterError)?;
        log::info!("Finished playlist sort run");
        Ok(total)
    }

    async fn starting(&mut self) -> SorterResult<()> {
        let user = self
            .gateway
            .current_user()
            .await
            .change_context(SorterError)?;
        println!("{}", "month-sort".green().bold());
        println!("Username: {}\n", user.display_name.as_str().cyan());
        self.user = Some(user);
        Ok(())
    }

    async fn load_saved_tracks(&mut self) -> SorterResult<()> {
        let records = self
            .gateway
            .saved_tracks()
            .await
            .change_context(SorterError)?;
        self.tracks = records
            .into_iter()
            .map(|record| {
                Track::new(record.title, record.artist, record.added_at, record.uri)
                    .change_context(SorterError)
            })
            .collect::<SorterResult<Vec<Track>>>()?;
        log::info!("Loaded {} saved tracks", self.tracks.len());
        Ok(())
    }

    /// Derives the distinct month buckets from the saved tracks, most recent
    /// first. `--reverse` flips the processing and display order.
    fn generate_buckets(&mut self) {
        log::info!("Generating playlist names");
        let distinct: HashSet<MonthBucket> = self
            .tracks
            .iter()
            .map(|track| track.bucket().clone())
            .collect();
        self.buckets = sort_chronologically(distinct.into_iter().collect());
        if self.options.reverse_log {
            self.buckets.reverse();
        }
        log::info!(
            "Final playlist list: {:?}",
            self.buckets
                .iter()
                .map(MonthBucket::display_name)
                .collect::<Vec<_>>()
        );
    }

    async fn create_monthly_playlists<F>(&mut self, confirm: F) -> SorterResult<()>
    where
        F: Fn(&str) -> SorterResult<bool>,
    {
        let month_passed = self.run_state.has_month_passed(Local::now().naive_local());
        let decision = creation_decision(month_passed, self.ledger.loaded_from_disk(), &self.options);
        let should_run = match decision {
            CreationDecision::Run => {
                if !self.options.force_playlist_creation {
                    println!("Playlist generation has not occurred this month, generating playlists...");
                }
                true
            }
            CreationDecision::Skip => false,
            CreationDecision::Prompt => confirm(
                "Playlist generation has already occurred this month, do you still want to generate playlists?",
            )?,
        };
        if !should_run {
            println!("Playlist generation skipped");
            log::info!("Playlist generation skipped");
            return Ok(());
        }
        log::info!("Playlist generation starting");

        // One live snapshot per pass; every worker re-checks it before
        // creating, so a same-run race against a stale cache cannot
        // duplicate a playlist.
        let existing = self
            .gateway
            .saved_playlists(false)
            .await
            .change_context(SorterError)?;
        let owner = self
            .user
            .as_ref()
            .ok_or(SorterError)
            .into_report()
            .attach_printable("User information was not fetched before playlist creation")?
            .id
            .clone();

        let gateway = &self.gateway;
        let existing = &existing;
        let owner = owner.as_str();
        let make_public = self.options.make_public;
        let outcomes: Vec<CreationOutcome> = stream::iter(
            self.buckets.iter().map(MonthBucket::display_name),
        )
        .map(|name| async move {
            create_bucket_playlist(gateway, existing, owner, name, make_public).await
        })
        .buffered(self.options.workers)
        .try_collect()
        .await?;

        for outcome in outcomes {
            println!("{}", outcome.log);
            if outcome.created {
                self.created_any = true;
            }
            self.ledger.record(outcome.name);
        }

        if !self.ledger.is_empty() {
            self.ledger.persist().change_context(SorterError)?;
        }
        Ok(())
    }

    /// Matches every bucket to a playlist id against the live playlist list,
    /// bypassing the cache once anything was created this run. A mismatch
    /// between resolved pairs and distinct buckets aborts the run before any
    /// sorting happens.
    async fn resolve_playlist_ids(&mut self) -> SorterResult<()> {
        log::info!("Retrieving playlist ids");
        let playlists = self
            .gateway
            .saved_playlists(self.created_any)
            .await
            .change_context(SorterError)?;
        self.resolved = self
            .buckets
            .iter()
            .filter_map(|bucket| {
                let display = bucket.display_name();
                playlists
                    .iter()
                    .find(|playlist| names_equal(&playlist.name, &display))
                    .map(|playlist| (bucket.clone(), playlist.id.clone()))
            })
            .collect();
        for (bucket, id) in &self.resolved {
            log::info!("Playlist name: {} id: {}", bucket.display_name(), id);
        }

        if self.resolved.len() != self.buckets.len() {
            return Err(Report::new(SorterError)
                .attach_printable(format!(
                    "Resolved only {} playlist ids for {} month buckets",
                    self.resolved.len(),
                    self.buckets.len()
                ))
                .attach(Suggestion(
                    "Run the program again with the --create-playlists flag".to_string(),
                )));
        }
        Ok(())
    }

    async fn sort_all_tracks(&mut self) -> SorterResult<usize> {
        println!("\nBeginning playlist sort");
        let gateway = &self.gateway;
        let tracks = &self.tracks;
        let reports: Vec<BucketSortReport> = stream::iter(self.resolved.clone())
            .map(|(bucket, playlist_id)| async move {
                sort_bucket(gateway, tracks, bucket, playlist_id).await
            })
            .buffered(self.options.workers)
            .try_collect()
            .await?;

        // Single-writer aggregation: each task reports its own count
        // instead of mutating a shared counter.
        let total: usize = reports.iter().map(|report| report.added).sum();

        for report in &reports {
            if report.lines.is_empty() {
                continue;
            }
            println!(
                "{}",
                format!("Sorting into playlist {}", report.name).bold()
            );
            for line in &report.lines {
                println!("{}", line);
            }
        }

        let count = match total {
            0 => "No new tracks added".to_string(),
            1 => "One track added".to_string(),
            n => format!("Total tracks added to playlists: {}", n),
        };
        println!("{}", count);
        println!("Finished playlist sort");
        Ok(total)
    }

    /// Removes every occurrence but the first of any URI appearing more than
    /// once in the playlist. Removals are position-indexed and guarded by
    /// the playlist's current snapshot id.
    pub async fn clean_playlist(&self, playlist_id: &str) -> SorterResult<usize> {
        let items = self
            .gateway
            .playlist_items(playlist_id)
            .await
            .change_context(SorterError)?;

        let mut positions_by_uri: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let entry = positions_by_uri.entry(item.uri.as_str()).or_default();
            if entry.is_empty() {
                order.push(item.uri.as_str());
            }
            entry.push(idx);
        }

        let removals: Vec<TrackRemoval> = order
            .into_iter()
            .filter_map(|uri| {
                let positions = &positions_by_uri[uri];
                if positions.len() > 1 {
                    Some(TrackRemoval {
                        uri: uri.to_string(),
                        positions: positions[1..].to_vec(),
                    })
                } else {
                    None
                }
            })
            .collect();

        if removals.is_empty() {
            println!("No duplicate tracks found");
            return Ok(0);
        }

        let snapshot_id = self
            .gateway
            .playlist_snapshot(playlist_id)
            .await
            .change_context(SorterError)?;
        for chunk in removals.chunks(MAX_ITEMS_PER_REQUEST) {
            self.gateway
                .remove_occurrences(playlist_id, chunk, &snapshot_id)
                .await
                .change_context(SorterError)?;
        }
        let removed: usize = removals.iter().map(|removal| removal.positions.len()).sum();
        println!("Removed {} duplicate occurrences", removed);
        Ok(removed)
    }
}

/// Creation worker: re-checks the shared live snapshot before creating so an
/// already existing playlist is only recorded, never duplicated.
async fn create_bucket_playlist<G: Gateway>(
    gateway: &G,
    existing: &[PlaylistRef],
    owner: &str,
    name: String,
    make_public: bool,
) -> SorterResult<CreationOutcome> {
    log::info!("Playlist creation called {}", name);
    for item in existing {
        if names_equal(&item.name, &name) {
            log::info!("Playlist already exists {}", name);
            let log = format!("Playlist {} already exists", name.as_str().yellow());
            return Ok(CreationOutcome {
                name,
                created: false,
                log,
            });
        }
    }
    let playlist = gateway
        .create_playlist(owner, &name, make_public, &name)
        .await
        .change_context(SorterError)?;
    log::info!("Added {} playlist", playlist.name);
    let log = format!("Created playlist {}", name.as_str().green());
    Ok(CreationOutcome {
        name,
        created: true,
        log,
    })
}

/// Sorting worker for one bucket. The bucket's tracks are recomputed from
/// the immutable saved-track list on every call; candidates are walked
/// oldest-saved-first so additions preserve the original save chronology.
async fn sort_bucket<G: Gateway>(
    gateway: &G,
    all_tracks: &[Track],
    bucket: MonthBucket,
    playlist_id: String,
) -> SorterResult<BucketSortReport> {
    let playlist_name = bucket.display_name();
    log::info!("Sorting into playlist: {}", playlist_name);

    let bucket_tracks: Vec<&Track> = all_tracks
        .iter()
        .filter(|track| track.bucket() == &bucket)
        .collect();
    let mut report = BucketSortReport {
        name: playlist_name,
        added: 0,
        lines: Vec::new(),
    };
    if bucket_tracks.is_empty() {
        return Ok(report);
    }

    let items = gateway
        .playlist_items(&playlist_id)
        .await
        .change_context(SorterError)?;
    let playlist_uris: HashSet<&str> = items.iter().map(|item| item.uri.as_str()).collect();

    let mut to_be_added: Vec<String> = Vec::new();
    // The saved-track list arrives newest first; walking it in reverse keeps
    // additions in original save order.
    for track in bucket_tracks.iter().rev() {
        let label = format!("{} ({})", track, track.open_url());
        if playlist_uris.contains(track.uri.as_str()) {
            log::info!("Track {} already in playlist {}", track, playlist_id);
            report.lines.push(format!(
                "{}\t{} already exists in the playlist",
                "[-]".red().bold(),
                label.as_str().cyan()
            ));
        } else {
            log::info!("Track {} will be added to playlist {}", track, playlist_id);
            report.lines.push(format!(
                "{}\t{} will be added to the playlist",
                "[+]".green().bold(),
                label.as_str().green()
            ));
            to_be_added.push(track.uri.clone());
        }
    }

    if to_be_added.is_empty() {
        log::info!("No tracks to add to playlist: {}", playlist_id);
    } else {
        for chunk in to_be_added.chunks(MAX_ITEMS_PER_REQUEST) {
            gateway
                .add_items(&playlist_id, chunk)
                .await
                .change_context(SorterError)?;
        }
        report.added = to_be_added.len();
    }
    Ok(report)
}
