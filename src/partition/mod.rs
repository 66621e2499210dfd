//! Partition derivation and path layout.
//!
//! A [`PartitionScheme`] turns [`RecordMetadata`] into a [`PartitionKey`]
//! (date segments first, then the configured metadata fields), and the
//! [`PartitionResolver`] maps keys to directories under the artifact root
//! using hive-style `name=value` segments:
//!
//! ```text
//! year=2024/month=01/source=gazette%2Fsp/edition-7.parquet
//! ```
//!
//! Values are form-url-encoded before becoming path segments, so separators
//! and `..` never survive as path structure and distinct values never share a
//! directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::models::{ArtifactId, PartitionKey, PartitionSegment, RecordMetadata};

/// File extension of artifact files.
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Longest file or directory name most filesystems accept (`NAME_MAX`).
pub const MAX_PATH_COMPONENT_LEN: usize = 255;

/// Errors raised while deriving a partition key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("malformed metadata: field '{field}' {reason}")]
    MalformedMetadata { field: &'static str, reason: String },
}

impl PartitionError {
    fn missing(field: &'static str) -> Self {
        PartitionError::MalformedMetadata {
            field,
            reason: "is required".to_string(),
        }
    }
}

/// How finely the date is split into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateGranularity {
    Year,
    Month,
    Day,
}

/// Metadata fields that can follow the date segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionField {
    Source,
    Category,
}

impl PartitionField {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionField::Source => "source",
            PartitionField::Category => "category",
        }
    }

    fn value<'a>(&self, metadata: &'a RecordMetadata) -> Option<&'a str> {
        match self {
            PartitionField::Source => metadata.source.as_deref(),
            PartitionField::Category => metadata.category.as_deref(),
        }
    }
}

/// The rule set deriving a partition key from metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScheme {
    pub granularity: DateGranularity,
    pub fields: Vec<PartitionField>,
}

impl Default for PartitionScheme {
    fn default() -> Self {
        Self::new(DateGranularity::Month, vec![PartitionField::Source])
    }
}

impl PartitionScheme {
    pub fn new(granularity: DateGranularity, fields: Vec<PartitionField>) -> Self {
        Self {
            granularity,
            fields,
        }
    }

    /// Names of the key segments this scheme produces, in order.
    pub fn segment_names(&self) -> Vec<&'static str> {
        let mut names = vec!["year"];
        if matches!(self.granularity, DateGranularity::Month | DateGranularity::Day) {
            names.push("month");
        }
        if self.granularity == DateGranularity::Day {
            names.push("day");
        }
        names.extend(self.fields.iter().map(PartitionField::name));
        names
    }

    /// Derive the key for `metadata`. Pure: identical metadata yields
    /// identical keys.
    pub fn resolve(&self, metadata: &RecordMetadata) -> Result<PartitionKey, PartitionError> {
        let raw_date = metadata
            .date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| PartitionError::missing("date"))?;
        let date = parse_date(raw_date)?;

        let mut segments = vec![PartitionSegment::new("year", format!("{:04}", date.year()))];
        if matches!(self.granularity, DateGranularity::Month | DateGranularity::Day) {
            segments.push(PartitionSegment::new("month", format!("{:02}", date.month())));
        }
        if self.granularity == DateGranularity::Day {
            segments.push(PartitionSegment::new("day", format!("{:02}", date.day())));
        }

        for field in &self.fields {
            let value = field
                .value(metadata)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PartitionError::missing(field.name()))?;
            let encoded_len = field.name().len() + 1 + encode_segment(value).len();
            if encoded_len > MAX_PATH_COMPONENT_LEN {
                return Err(PartitionError::MalformedMetadata {
                    field: field.name(),
                    reason: format!(
                        "is {} bytes as a directory name, limit is {}",
                        encoded_len, MAX_PATH_COMPONENT_LEN
                    ),
                });
            }
            segments.push(PartitionSegment::new(field.name(), value));
        }

        Ok(PartitionKey::new(segments))
    }
}

/// Parse a record date, `YYYY-MM-DD` or RFC 3339.
pub fn parse_date(raw: &str) -> Result<NaiveDate, PartitionError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    Err(PartitionError::MalformedMetadata {
        field: "date",
        reason: format!("'{}' is not YYYY-MM-DD or RFC 3339", raw),
    })
}

/// Inclusive range of days covered by the `year`/`month`/`day` segments of a
/// partition. `None` if there is no valid year segment.
pub fn date_period<'a, I>(segments: I) -> Option<(NaiveDate, NaiveDate)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let (mut year, mut month, mut day) = (None, None, None);
    for (name, value) in segments {
        match name {
            "year" => year = value.parse::<i32>().ok(),
            "month" => month = value.parse::<u32>().ok(),
            "day" => day = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let year = year?;
    match (month, day) {
        (Some(month), Some(day)) => {
            let date = NaiveDate::from_ymd_opt(year, month, day)?;
            Some((date, date))
        }
        (Some(month), None) => {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let next = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)?
            };
            Some((first, next.pred_opt()?))
        }
        _ => Some((
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        )),
    }
}

/// Encode a value so it is safe as a single path component.
///
/// Form-url-encoding keeps `[A-Za-z0-9*-._]` and escapes everything else
/// (space becomes `+`). A value made only of dots is fully escaped so it can
/// never read as `.` or `..`.
pub fn encode_segment(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c == '.') {
        return "%2E".repeat(value.len());
    }
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Maps partition keys to locations in the artifact tree.
#[derive(Debug, Clone, Default)]
pub struct PartitionResolver {
    scheme: PartitionScheme,
}

impl PartitionResolver {
    pub fn new(scheme: PartitionScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    pub fn resolve(&self, metadata: &RecordMetadata) -> Result<PartitionKey, PartitionError> {
        self.scheme.resolve(metadata)
    }

    /// Directory of a partition, relative to the artifact root.
    pub fn dir_for(&self, key: &PartitionKey) -> PathBuf {
        key.segments()
            .iter()
            .map(|seg| format!("{}={}", seg.name, encode_segment(&seg.value)))
            .collect()
    }

    /// Directory holding every key whose leading values equal `values`.
    ///
    /// Segment names come from the scheme; extra values beyond the scheme's
    /// depth are ignored.
    pub fn dir_for_prefix<S: AsRef<str>>(&self, values: &[S]) -> PathBuf {
        self.scheme
            .segment_names()
            .into_iter()
            .zip(values)
            .map(|(name, value)| format!("{}={}", name, encode_segment(value.as_ref())))
            .collect()
    }

    /// Deepest directory containing every partition dated within
    /// `start..=end`.
    pub fn dir_for_date_range(&self, start: NaiveDate, end: NaiveDate) -> PathBuf {
        let mut values = Vec::new();
        if start.year() == end.year() {
            values.push(format!("{:04}", start.year()));
            let names = self.scheme.segment_names();
            if names.get(1) == Some(&"month") && start.month() == end.month() {
                values.push(format!("{:02}", start.month()));
                if names.get(2) == Some(&"day") && start.day() == end.day() {
                    values.push(format!("{:02}", start.day()));
                }
            }
        }
        self.dir_for_prefix(&values)
    }

    /// Days covered by the partition an artifact path lives in.
    pub fn period_of_path(&self, relative_path: &Path) -> Option<(NaiveDate, NaiveDate)> {
        let dir = relative_path.parent()?;
        date_period(
            dir.components()
                .filter_map(|c| c.as_os_str().to_str())
                .filter_map(|c| c.split_once('=')),
        )
    }

    /// File path of an artifact, relative to the artifact root.
    pub fn path_for(&self, key: &PartitionKey, artifact_id: &ArtifactId) -> PathBuf {
        self.dir_for(key).join(format!(
            "{}.{}",
            encode_segment(artifact_id.as_str()),
            ARTIFACT_EXTENSION
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::{Component, Path};

    fn meta(date: &str, source: &str) -> RecordMetadata {
        RecordMetadata::new().with_date(date).with_source(source)
    }

    fn only_normal_components(path: &Path) -> bool {
        path.components().all(|c| matches!(c, Component::Normal(_)))
    }

    #[test]
    fn test_default_scheme_year_month_source() {
        let resolver = PartitionResolver::default();
        let key = resolver.resolve(&meta("2024-01-01", "a")).unwrap();
        assert_eq!(key.values(), vec!["2024", "01", "a"]);
        assert_eq!(
            resolver.dir_for(&key),
            PathBuf::from("year=2024/month=01/source=a")
        );
    }

    #[test]
    fn test_resolve_deterministic() {
        let resolver = PartitionResolver::default();
        let m = meta("2023-11-30", "gazette");
        assert_eq!(resolver.resolve(&m).unwrap(), resolver.resolve(&m).unwrap());
    }

    #[test]
    fn test_granularities() {
        let m = meta("2024-03-09", "a").with_category("decree");

        let year = PartitionScheme::new(DateGranularity::Year, vec![]);
        assert_eq!(year.resolve(&m).unwrap().values(), vec!["2024"]);

        let day = PartitionScheme::new(
            DateGranularity::Day,
            vec![PartitionField::Category, PartitionField::Source],
        );
        assert_eq!(
            day.resolve(&m).unwrap().values(),
            vec!["2024", "03", "09", "decree", "a"]
        );
        assert_eq!(
            day.segment_names(),
            vec!["year", "month", "day", "category", "source"]
        );
    }

    #[test]
    fn test_rfc3339_date_accepted() {
        let resolver = PartitionResolver::default();
        let key = resolver
            .resolve(&meta("2024-05-06T23:10:00+00:00", "a"))
            .unwrap();
        assert_eq!(key.values(), vec!["2024", "05", "a"]);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let resolver = PartitionResolver::default();

        let err = resolver
            .resolve(&RecordMetadata::new().with_source("a"))
            .unwrap_err();
        assert_eq!(err, PartitionError::missing("date"));

        let err = resolver
            .resolve(&RecordMetadata::new().with_date("2024-01-01"))
            .unwrap_err();
        assert_eq!(err, PartitionError::missing("source"));

        let err = resolver.resolve(&meta("2024-01-01", "  ")).unwrap_err();
        assert_eq!(err, PartitionError::missing("source"));
    }

    #[test]
    fn test_unparsable_date_is_malformed() {
        let resolver = PartitionResolver::default();
        let err = resolver.resolve(&meta("01/02/2024", "a")).unwrap_err();
        assert!(matches!(
            err,
            PartitionError::MalformedMetadata { field: "date", .. }
        ));
    }

    #[test]
    fn test_extra_fields_ignored() {
        let resolver = PartitionResolver::default();
        let plain = meta("2024-01-01", "a");
        let noisy = plain
            .clone()
            .with_extra("edition", serde_json::json!({"n": 3}));
        assert_eq!(
            resolver.resolve(&plain).unwrap(),
            resolver.resolve(&noisy).unwrap()
        );
    }

    #[test]
    fn test_traversal_values_stay_in_one_segment() {
        let resolver = PartitionResolver::default();
        for source in ["..", "../../etc", "a/b", "a\\b", ".", "/abs", "x=y"] {
            let key = resolver.resolve(&meta("2024-01-01", source)).unwrap();
            let dir = resolver.dir_for(&key);
            assert!(only_normal_components(&dir), "{:?} escaped: {:?}", source, dir);
            assert_eq!(dir.components().count(), 3, "{:?} split: {:?}", source, dir);
        }
    }

    #[test]
    fn test_traversal_artifact_id_stays_in_partition() {
        let resolver = PartitionResolver::default();
        let key = resolver.resolve(&meta("2024-01-01", "a")).unwrap();
        let id = ArtifactId::new("../../../etc/passwd").unwrap();
        let path = resolver.path_for(&key, &id);
        assert!(only_normal_components(&path));
        assert_eq!(path.parent().unwrap(), resolver.dir_for(&key));
    }

    #[test]
    fn test_distinct_keys_distinct_dirs() {
        let resolver = PartitionResolver::default();
        let sources = ["a b", "a+b", "a%20b", "a/b", "a_b", "A", "a", "..", "%2E%2E"];
        let mut dirs = std::collections::HashSet::new();
        for s in sources {
            let key = resolver.resolve(&meta("2024-01-01", s)).unwrap();
            assert!(dirs.insert(resolver.dir_for(&key)), "collision for {:?}", s);
        }
    }

    #[test]
    fn test_dir_for_prefix_matches_full_dir() {
        let resolver = PartitionResolver::default();
        let key = resolver.resolve(&meta("2024-01-01", "a/b")).unwrap();
        assert_eq!(
            resolver.dir_for_prefix(&["2024", "01", "a/b"]),
            resolver.dir_for(&key)
        );
        assert_eq!(
            resolver.dir_for_prefix(&["2024"]),
            PathBuf::from("year=2024")
        );
        assert_eq!(resolver.dir_for_prefix::<&str>(&[]), PathBuf::new());
    }

    #[test]
    fn test_oversize_source_is_malformed() {
        let resolver = PartitionResolver::default();
        let err = resolver
            .resolve(&meta("2024-01-01", &"é".repeat(100)))
            .unwrap_err();
        assert!(matches!(
            err,
            PartitionError::MalformedMetadata { field: "source", .. }
        ));

        // Fits before encoding, not after.
        let slashes = "/".repeat(100);
        assert!(slashes.len() < MAX_PATH_COMPONENT_LEN);
        assert!(resolver.resolve(&meta("2024-01-01", &slashes)).is_err());

        let longest_ok = "a".repeat(MAX_PATH_COMPONENT_LEN - "source=".len());
        assert!(resolver.resolve(&meta("2024-01-01", &longest_ok)).is_ok());
    }

    #[test]
    fn test_date_period() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        assert_eq!(
            date_period([("year", "2024"), ("month", "02"), ("source", "a")]),
            Some((day(2024, 2, 1), day(2024, 2, 29)))
        );
        assert_eq!(
            date_period([("year", "2023"), ("month", "12")]),
            Some((day(2023, 12, 1), day(2023, 12, 31)))
        );
        assert_eq!(
            date_period([("year", "2024"), ("month", "03"), ("day", "09")]),
            Some((day(2024, 3, 9), day(2024, 3, 9)))
        );
        assert_eq!(
            date_period([("year", "2024")]),
            Some((day(2024, 1, 1), day(2024, 12, 31)))
        );
        assert_eq!(date_period([("source", "a")]), None);
    }

    #[test]
    fn test_dir_for_date_range() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let resolver = PartitionResolver::default();

        assert_eq!(
            resolver.dir_for_date_range(day(2024, 1, 3), day(2024, 1, 20)),
            PathBuf::from("year=2024/month=01")
        );
        assert_eq!(
            resolver.dir_for_date_range(day(2024, 1, 3), day(2024, 5, 1)),
            PathBuf::from("year=2024")
        );
        assert_eq!(
            resolver.dir_for_date_range(day(2023, 12, 31), day(2024, 1, 1)),
            PathBuf::new()
        );

        let daily = PartitionResolver::new(PartitionScheme::new(DateGranularity::Day, vec![]));
        assert_eq!(
            daily.dir_for_date_range(day(2024, 1, 3), day(2024, 1, 3)),
            PathBuf::from("year=2024/month=01/day=03")
        );
    }

    #[test]
    fn test_period_of_path() {
        let resolver = PartitionResolver::default();
        let key = resolver.resolve(&meta("2024-01-15", "a")).unwrap();
        let path = resolver.path_for(&key, &ArtifactId::new("doc").unwrap());
        let (start, end) = resolver.period_of_path(&path).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    }

    #[test]
    fn test_path_for() {
        let resolver = PartitionResolver::default();
        let key = resolver.resolve(&meta("2024-01-01", "a")).unwrap();
        let id = ArtifactId::new("doc 1").unwrap();
        assert_eq!(
            resolver.path_for(&key, &id),
            PathBuf::from("year=2024/month=01/source=a/doc+1.parquet")
        );
    }
}
