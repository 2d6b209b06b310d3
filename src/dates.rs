use std::fmt;

use chrono::NaiveDateTime;
use error_stack::{IntoReport, ResultExt};

#[derive(Debug)]
pub struct DateError;
impl fmt::Display for DateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Date error")
    }
}
impl std::error::Error for DateError {}

pub type DateResult<T> = error_stack::Result<T, DateError>;

/// Timestamp format used by the Spotify API for `added_at` values.
pub const ADDED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// The month playlist a track belongs to, e.g. ("August", "2023").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonthBucket {
    pub month: String,
    pub year: String,
}

impl MonthBucket {
    pub fn new(month: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            year: year.into(),
        }
    }

    /// Name under which the bucket's playlist is created, e.g. "August '23".
    /// Years shorter than four digits are kept whole instead of being
    /// truncated.
    pub fn display_name(&self) -> String {
        let short_year = if self.year.len() >= 4 {
            self.year.get(2..).unwrap_or(self.year.as_str())
        } else {
            self.year.as_str()
        };
        format!("{} '{}", self.month, short_year)
    }

    fn month_index(&self) -> usize {
        MONTHS
            .iter()
            .position(|m| m.eq_ignore_ascii_case(&self.month))
            .unwrap_or(0)
    }
}

impl fmt::Display for MonthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Maps an ISO-8601 UTC timestamp to its month bucket.
pub fn bucket_of(timestamp: &str) -> DateResult<MonthBucket> {
    let datem = NaiveDateTime::parse_from_str(timestamp, ADDED_AT_FORMAT)
        .into_report()
        .attach_printable(format!("Failed to parse timestamp: {}", timestamp))
        .change_context(DateError)?;
    use chrono::Datelike;
    Ok(MonthBucket::new(
        MONTHS[datem.month0() as usize],
        format!("{:04}", datem.year()),
    ))
}

/// Sorts buckets most recent first: by year, then by calendar month within
/// the year (December before January).
pub fn sort_chronologically(mut buckets: Vec<MonthBucket>) -> Vec<MonthBucket> {
    buckets.sort_by(|a, b| {
        (b.year.clone(), b.month_index()).cmp(&(a.year.clone(), a.month_index()))
    });
    buckets
}

/// Lowercases text and escapes non-ASCII characters as XML numeric character
/// references, so playlist names compare byte-exactly regardless of case.
/// Visually similar but distinct Unicode characters stay distinct.
pub fn normalize_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii() {
            out.push(ch as u8);
        } else {
            out.extend_from_slice(format!("&#{};", ch as u32).as_bytes());
        }
    }
    out
}

pub fn names_equal(a: &str, b: &str) -> bool {
    normalize_text(a) == normalize_text(b)
}

/// Ranks a string by the sum of its lowercased character codes. This is an
/// approximate ordering used only by [`search_normalized`]; it is not a
/// lexicographic order and must never back a correctness-critical comparison.
fn char_code_sum(s: &str) -> u64 {
    s.to_lowercase().chars().map(|c| c as u64).sum()
}

/// Binary search over the char-code-sum ordering, falling back to exact
/// normalized equality at each probe. Approximate index aid only.
pub fn search_normalized(dataset: &[String], target: &str) -> bool {
    let mut sorted: Vec<&String> = dataset.iter().collect();
    sorted.sort_by_key(|s| char_code_sum(s));

    let mut low = 0i64;
    let mut high = sorted.len() as i64 - 1;
    while low <= high {
        let mid = ((high + low) / 2) as usize;
        let guess = sorted[mid];
        if names_equal(guess, target) {
            return true;
        }
        if char_code_sum(guess) > char_code_sum(target) {
            high = mid as i64 - 1;
        } else {
            low = mid as i64 + 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_of_is_deterministic() {
        let first = bucket_of("2022-11-23T02:04:46Z").unwrap();
        let second = bucket_of("2022-11-23T02:04:46Z").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, MonthBucket::new("November", "2022"));
    }

    #[test]
    fn test_bucket_of_old_dates() {
        let bucket = bucket_of("1537-03-12T02:04:46Z").unwrap();
        assert_eq!(bucket, MonthBucket::new("March", "1537"));
    }

    #[test]
    fn test_bucket_of_rejects_malformed_timestamps() {
        assert!(bucket_of("2022-11-23 02:04:46").is_err());
        assert!(bucket_of("not a date").is_err());
        assert!(bucket_of("").is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            MonthBucket::new("August", "2023").display_name(),
            "August '23"
        );
        assert_eq!(
            MonthBucket::new("December", "2020").display_name(),
            "December '20"
        );
    }

    #[test]
    fn test_display_name_short_year_does_not_panic() {
        assert_eq!(MonthBucket::new("August", "23").display_name(), "August '23");
        assert_eq!(MonthBucket::new("August", "3").display_name(), "August '3");
        assert_eq!(MonthBucket::new("August", "").display_name(), "August '");
    }

    #[test]
    fn test_sort_chronologically() {
        let buckets = vec![
            MonthBucket::new("June", "2003"),
            MonthBucket::new("December", "2022"),
            MonthBucket::new("January", "2012"),
        ];
        let sorted = sort_chronologically(buckets);
        assert_eq!(
            sorted,
            vec![
                MonthBucket::new("December", "2022"),
                MonthBucket::new("January", "2012"),
                MonthBucket::new("June", "2003"),
            ]
        );
    }

    #[test]
    fn test_sort_orders_months_within_a_year() {
        let buckets = vec![
            MonthBucket::new("January", "2023"),
            MonthBucket::new("December", "2023"),
            MonthBucket::new("July", "2023"),
        ];
        let sorted = sort_chronologically(buckets);
        assert_eq!(
            sorted,
            vec![
                MonthBucket::new("December", "2023"),
                MonthBucket::new("July", "2023"),
                MonthBucket::new("January", "2023"),
            ]
        );
    }

    #[test]
    fn test_normalize_text_ignores_case() {
        assert_eq!(normalize_text("December '20"), normalize_text("DECEMBER '20"));
        assert!(names_equal("August '23", "august '23"));
    }

    #[test]
    fn test_normalize_text_escapes_non_ascii() {
        assert_eq!(normalize_text("😭"), b"&#128557;".to_vec());
        assert_ne!(normalize_text("😭"), normalize_text("a"));
    }

    #[test]
    fn test_normalize_text_keeps_confusables_distinct() {
        // Cyrillic "а" vs Latin "a"
        assert!(!names_equal("\u{0430}", "a"));
    }

    #[test]
    fn test_search_normalized() {
        let dataset: Vec<String> = vec![
            "August '23".to_string(),
            "July '23".to_string(),
            "December '20".to_string(),
        ];
        assert!(search_normalized(&dataset, "AUGUST '23"));
        assert!(!search_normalized(&dataset, "March '19"));
    }
}
