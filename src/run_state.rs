use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};
use error_stack::{IntoReport, ResultExt};

use crate::dates::MONTHS;

#[derive(Debug)]
pub struct RunStateError;
impl fmt::Display for RunStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Run state error")
    }
}
impl std::error::Error for RunStateError {}

pub type RunStateResult<T> = error_stack::Result<T, RunStateError>;

const LAST_RUN_FILE_NAME: &str = "last_run.txt";
const LAST_RUN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp of the last completed run. Absent or corrupt state means
/// "never run" and is not an error.
#[derive(Debug)]
pub struct RunState {
    path: PathBuf,
    last_run: Option<NaiveDateTime>,
}

impl RunState {
    pub fn load(appdata_dir: &Path) -> Self {
        let path = appdata_dir.join(LAST_RUN_FILE_NAME);
        let last_run = fs::read_to_string(&path).ok().and_then(|contents| {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                return None;
            }
            match NaiveDateTime::parse_from_str(trimmed, LAST_RUN_FORMAT) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    log::warn!("Corrupt last-run timestamp, treating as never run: {}", err);
                    None
                }
            }
        });
        Self { path, last_run }
    }

    pub fn last_run(&self) -> Option<NaiveDateTime> {
        self.last_run
    }

    /// True when the calendar month of the last run differs from the
    /// calendar month of `now`. A never-run state counts as this month.
    pub fn has_month_passed(&self, now: NaiveDateTime) -> bool {
        match self.last_run {
            Some(last) => month_name(last) != month_name(now),
            None => false,
        }
    }

    /// Persists `now` as the last completed run. Called only after the whole
    /// pipeline finished without a fatal error.
    pub fn mark_complete(&mut self, now: NaiveDateTime) -> RunStateResult<()> {
        let tmp_path = self.path.with_extension("txt.tmp");
        fs::write(&tmp_path, now.format(LAST_RUN_FORMAT).to_string())
            .into_report()
            .attach_printable(format!(
                "Failed to write last-run file at {}",
                tmp_path.display()
            ))
            .change_context(RunStateError)?;
        fs::rename(&tmp_path, &self.path)
            .into_report()
            .attach_printable(format!(
                "Failed to replace last-run file at {}",
                self.path.display()
            ))
            .change_context(RunStateError)?;
        self.last_run = Some(now);
        Ok(())
    }
}

fn month_name(datetime: NaiveDateTime) -> &'static str {
    MONTHS[datetime.month0() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(datetime: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(datetime, LAST_RUN_FORMAT).unwrap()
    }

    #[test]
    fn test_never_run_counts_as_this_month() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::load(dir.path());
        assert_eq!(state.last_run(), None);
        assert!(!state.has_month_passed(at("2023-08-15 12:00:00")));
    }

    #[test]
    fn test_month_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RunState::load(dir.path());
        state.mark_complete(at("2023-07-31 23:59:59")).unwrap();
        assert!(state.has_month_passed(at("2023-08-01 00:00:01")));
        assert!(!state.has_month_passed(at("2023-07-20 10:00:00")));
    }

    #[test]
    fn test_mark_complete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RunState::load(dir.path());
        state.mark_complete(at("2023-08-04 10:30:00")).unwrap();

        let reloaded = RunState::load(dir.path());
        assert_eq!(reloaded.last_run(), Some(at("2023-08-04 10:30:00")));
    }

    #[test]
    fn test_corrupt_file_degrades_to_never_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LAST_RUN_FILE_NAME), "089/not-a-date").unwrap();
        let state = RunState::load(dir.path());
        assert_eq!(state.last_run(), None);
    }
}
