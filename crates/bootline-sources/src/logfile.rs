//! Line-oriented log sources.
//!
//! [`LogFile`] is the shared base: it resolves a path (or glob over rotated
//! logs), transparently gunzips, caches the raw bytes, finds regex matches,
//! and extracts timestamps. [`SyslogSource`] and [`CniLogSource`] are thin
//! wrappers binding a default path and timestamp format.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Result, SourceError};
use crate::event::{EventDescriptor, EventMatcher, FindResult};
use crate::source::Source;

static REPEATED_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("static pattern compiles"));

/// Syslog-style timestamps: `Jan  2 15:04:05` (no year).
pub static SYSLOG_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z][a-z]+[ ]+[0-9][0-9]? [0-9]{2}:[0-9]{2}:[0-9]{2}")
        .expect("static pattern compiles")
});

/// RFC 3339 timestamps with fractional seconds, as written by container
/// runtimes: `2024-01-02T15:04:05.999999999Z`.
pub static RFC3339_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]+Z")
        .expect("static pattern compiles")
});

/// How a log source's extracted timestamp strings are parsed.
#[derive(Debug, Clone)]
pub enum TimestampFormat {
    /// A strftime layout. When `needs_year` is set the raw timestamp carries
    /// no year and the instance launch year is appended before parsing.
    Strftime {
        /// The chrono strftime layout.
        layout: &'static str,
        /// Whether the raw text lacks an explicit year.
        needs_year: bool,
    },
    /// RFC 3339 timestamps, parsed directly.
    Rfc3339,
}

/// Shared base for log-file sources.
///
/// Reads the resolved file fully into an internal byte cache; subsequent
/// lookups reuse the cache until [`LogFile::clear_cache`] is called.
pub struct LogFile {
    pattern: String,
    timestamp_regex: &'static Regex,
    format: TimestampFormat,
    launch_year: i32,
    cache: Mutex<Option<Vec<u8>>>,
}

impl LogFile {
    /// Creates a log file reader over a path or glob pattern.
    pub fn new(
        pattern: impl Into<String>,
        timestamp_regex: &'static Regex,
        format: TimestampFormat,
        launch_year: i32,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            timestamp_regex,
            format,
            launch_year,
            cache: Mutex::new(None),
        }
    }

    /// The configured path or glob pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Drops the cached file contents.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    /// Expands the configured pattern and picks the file with the oldest
    /// modification time (tie-break: lexical path order).
    ///
    /// Rotated logs write the earliest boot events into the first-written
    /// file, which is the oldest one by mtime, not the live log.
    fn resolve_path(&self) -> Result<PathBuf> {
        let entries = glob::glob(&self.pattern).map_err(|e| SourceError::Unresolved {
            path: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        let mut matches: Vec<PathBuf> = entries.filter_map(std::result::Result::ok).collect();
        if matches.is_empty() {
            return Err(SourceError::Unresolved {
                path: self.pattern.clone(),
                reason: "no files matched".to_string(),
            });
        }
        matches.sort_by_key(|path| {
            let mtime = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            (mtime, path.clone())
        });
        Ok(matches.remove(0))
    }

    /// Reads (and caches) the resolved file, gunzipping `.gz` files while
    /// streaming.
    pub fn read(&self) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().clone() {
            return Ok(cached);
        }
        let path = self.resolve_path()?;
        let file = File::open(&path)?;
        let mut buffer = Vec::new();
        if path.extension().is_some_and(|ext| ext == "gz") {
            GzDecoder::new(file).read_to_end(&mut buffer)?;
        } else {
            BufReader::new(file).read_to_end(&mut buffer)?;
        }
        *self.cache.lock() = Some(buffer.clone());
        Ok(buffer)
    }

    /// Finds all non-overlapping matches of `pattern` in the cached log.
    ///
    /// Zero matches is an explicit error so the retry loop treats the source
    /// as incomplete rather than satisfied-but-empty.
    pub fn find_matches(&self, pattern: &Regex) -> Result<Vec<String>> {
        let buffer = self.read()?;
        let text = String::from_utf8_lossy(&buffer);
        let lines: Vec<String> = pattern
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .collect();
        if lines.is_empty() {
            return Err(SourceError::NoMatch {
                path: self.pattern.clone(),
                pattern: pattern.as_str().to_string(),
            });
        }
        Ok(lines)
    }

    /// Extracts and parses the timestamp from a matched line.
    pub fn parse_timestamp(&self, line: &str) -> Result<DateTime<Utc>> {
        let raw = self
            .timestamp_regex
            .find(line)
            .ok_or_else(|| SourceError::TimestampNotFound {
                pattern: self.timestamp_regex.as_str().to_string(),
                line: line.to_string(),
            })?
            .as_str();
        let raw = REPEATED_SPACE.replace_all(raw, " ").into_owned();
        match &self.format {
            TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| SourceError::TimestampParse {
                    raw,
                    reason: e.to_string(),
                }),
            TimestampFormat::Strftime { layout, needs_year } => {
                let candidate = if *needs_year && !raw.contains(&self.launch_year.to_string()) {
                    format!("{raw} {}", self.launch_year)
                } else {
                    raw.clone()
                };
                NaiveDateTime::parse_from_str(&candidate, layout)
                    .map(|naive| naive.and_utc())
                    .map_err(|e| SourceError::TimestampParse {
                        raw: candidate,
                        reason: e.to_string(),
                    })
            }
        }
    }

    /// Full lookup for one event: match, timestamp, annotate, sort, select.
    ///
    /// Timestamp parse failures become per-result errors; they never abort
    /// the batch.
    pub fn find_event(
        &self,
        event: &EventDescriptor,
        source_name: &str,
    ) -> Result<Vec<FindResult>> {
        let EventMatcher::Pattern(pattern) = &event.matcher else {
            return Err(SourceError::UnsupportedMatcher {
                source_name: source_name.to_string(),
                matcher: format!("{:?}", event.matcher),
            });
        };
        let lines = self.find_matches(pattern)?;
        let mut results = Vec::with_capacity(lines.len());
        for line in lines {
            let (timestamp, error) = match self.parse_timestamp(&line) {
                Ok(ts) => (Some(ts), None),
                Err(e) => (None, Some(e)),
            };
            let comment = event.comment.map(|rule| rule.apply(&line));
            results.push(FindResult {
                line,
                timestamp,
                comment,
                error,
            });
        }
        results.sort_by_key(FindResult::sort_timestamp);
        Ok(event.selector.select(results))
    }
}

/// The `/var/log/messages` log source.
pub struct SyslogSource {
    log: LogFile,
}

impl SyslogSource {
    /// Registry name of this source.
    pub const NAME: &'static str = "messages";
    /// Default glob covering rotated syslog files.
    pub const DEFAULT_PATH: &'static str = "/var/log/messages*";

    /// Creates a syslog source. Syslog stamps carry no year, so the instance
    /// launch year is supplied for parsing.
    pub fn new(path: impl Into<String>, launch_year: i32) -> Self {
        Self {
            log: LogFile::new(
                path,
                &SYSLOG_TIMESTAMP,
                TimestampFormat::Strftime {
                    layout: "%b %d %H:%M:%S %Y",
                    needs_year: true,
                },
                launch_year,
            ),
        }
    }
}

#[async_trait]
impl Source for SyslogSource {
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>> {
        self.log.find_event(event, Self::NAME)
    }

    fn clear_cache(&self) {
        self.log.clear_cache();
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        self.log.pattern().to_string()
    }
}

/// The CNI plugin pod log source.
pub struct CniLogSource {
    log: LogFile,
}

impl CniLogSource {
    /// Registry name of this source.
    pub const NAME: &'static str = "cni";
    /// Default glob for the CNI daemonset's pod logs.
    pub const DEFAULT_PATH: &'static str =
        "/var/log/pods/kube-system_aws-node-*/aws-node/*.log";

    /// Creates a CNI pod log source.
    pub fn new(path: impl Into<String>, launch_year: i32) -> Self {
        Self {
            log: LogFile::new(path, &RFC3339_TIMESTAMP, TimestampFormat::Rfc3339, launch_year),
        }
    }
}

#[async_trait]
impl Source for CniLogSource {
    async fn find(&self, event: &EventDescriptor) -> Result<Vec<FindResult>> {
        self.log.find_event(event, Self::NAME)
    }

    fn clear_cache(&self) {
        self.log.clear_cache();
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn describe(&self) -> String {
        self.log.pattern().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MatchSelector;
    use chrono::{Datelike, TimeZone, Timelike};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::{self, FileTimes};
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    fn syslog_source(dir: &std::path::Path) -> SyslogSource {
        SyslogSource::new(format!("{}/messages*", dir.display()), 2024)
    }

    fn pattern_event(source: &str, pattern: &str) -> EventDescriptor {
        EventDescriptor::new(
            "Test Event",
            "test_event",
            source,
            EventMatcher::Pattern(Regex::new(pattern).unwrap()),
        )
    }

    fn set_mtime(path: &std::path::Path, when: SystemTime) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_times(FileTimes::new().set_modified(when)).unwrap();
    }

    #[test]
    fn parses_syslog_timestamp_with_year_fallback() {
        let log = LogFile::new(
            "/dev/null",
            &SYSLOG_TIMESTAMP,
            TimestampFormat::Strftime {
                layout: "%b %d %H:%M:%S %Y",
                needs_year: true,
            },
            2024,
        );
        let ts = log
            .parse_timestamp("Jan  2 15:04:05 host kernel: Linux version 6.1")
            .unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 2);
        assert_eq!(ts.hour(), 15);
    }

    #[test]
    fn parses_rfc3339_timestamp() {
        let log = LogFile::new("/dev/null", &RFC3339_TIMESTAMP, TimestampFormat::Rfc3339, 0);
        let ts = log
            .parse_timestamp("2024-03-05T10:20:30.123456789Z stderr F copied CNI config")
            .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap() + chrono::Duration::nanoseconds(123_456_789));
    }

    #[test]
    fn timestamp_parse_failure_is_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages");
        fs::write(&path, "Xyz !! bad stamp Starting Kubernetes Kubelet\nJan  2 15:04:05 ip-10-0-0-1 systemd: Starting Kubernetes Kubelet\n").unwrap();

        let source = syslog_source(dir.path());
        let event = pattern_event(SyslogSource::NAME, r".*Starting Kubernetes Kubelet.*")
            .with_selector(MatchSelector::All);
        let results =
            tokio::runtime::Runtime::new().unwrap().block_on(source.find(&event)).unwrap();

        assert_eq!(results.len(), 2);
        let errored: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();
        assert_eq!(errored.len(), 1);
        assert!(errored[0].timestamp.is_none());
    }

    #[test]
    fn no_match_is_an_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("messages"), "Jan  2 15:04:05 host nothing relevant\n")
            .unwrap();

        let log = LogFile::new(
            format!("{}/messages*", dir.path().display()),
            &SYSLOG_TIMESTAMP,
            TimestampFormat::Strftime {
                layout: "%b %d %H:%M:%S %Y",
                needs_year: true,
            },
            2024,
        );
        let err = log.find_matches(&Regex::new("Starting containerd").unwrap()).unwrap_err();
        assert!(matches!(err, SourceError::NoMatch { .. }));
    }

    #[test]
    fn missing_file_is_unresolved() {
        let log = LogFile::new(
            "/nonexistent/bootline-test/messages*",
            &SYSLOG_TIMESTAMP,
            TimestampFormat::Strftime {
                layout: "%b %d %H:%M:%S %Y",
                needs_year: true,
            },
            2024,
        );
        assert!(matches!(log.read().unwrap_err(), SourceError::Unresolved { .. }));
    }

    #[test]
    fn glob_selects_oldest_rotated_file_and_gunzips() {
        let dir = tempfile::tempdir().unwrap();

        // The rotated, compressed log was written first and holds the boot
        // events; the live log is newer.
        let rotated = dir.path().join("messages.1.gz");
        let mut encoder = GzEncoder::new(File::create(&rotated).unwrap(), Compression::default());
        encoder
            .write_all(b"Jan  2 15:00:00 host kernel: Linux version 6.1\n")
            .unwrap();
        encoder.finish().unwrap();

        let live = dir.path().join("messages");
        fs::write(&live, "Jan  2 16:00:00 host restarted much later\n").unwrap();

        let now = SystemTime::now();
        set_mtime(&rotated, now - Duration::from_secs(3600));
        set_mtime(&live, now);

        let log = LogFile::new(
            format!("{}/messages*", dir.path().display()),
            &SYSLOG_TIMESTAMP,
            TimestampFormat::Strftime {
                layout: "%b %d %H:%M:%S %Y",
                needs_year: true,
            },
            2024,
        );
        let lines = log.find_matches(&Regex::new(r".*kernel: Linux version.*").unwrap()).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Linux version"));
    }

    #[test]
    fn cache_persists_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages");
        fs::write(&path, "Jan  2 15:04:05 host first contents\n").unwrap();

        let log = LogFile::new(
            format!("{}/messages", dir.path().display()),
            &SYSLOG_TIMESTAMP,
            TimestampFormat::Strftime {
                layout: "%b %d %H:%M:%S %Y",
                needs_year: true,
            },
            2024,
        );
        assert!(log.find_matches(&Regex::new("first contents").unwrap()).is_ok());

        fs::write(&path, "Jan  2 15:05:05 host second contents\n").unwrap();
        // Still answering from cache.
        assert!(log.find_matches(&Regex::new("first contents").unwrap()).is_ok());
        assert!(log.find_matches(&Regex::new("second contents").unwrap()).is_err());

        log.clear_cache();
        assert!(log.find_matches(&Regex::new("second contents").unwrap()).is_ok());
    }

    #[test]
    fn unsupported_matcher_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("messages"), "Jan  2 15:04:05 host boot\n").unwrap();
        let source = syslog_source(dir.path());

        let event = EventDescriptor::new(
            "Pod Created",
            "pod_created",
            SyslogSource::NAME,
            EventMatcher::PodCreation,
        );
        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(source.find(&event))
            .unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedMatcher { .. }));
    }

    #[test]
    fn results_are_sorted_and_selected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("messages"),
            "Jan  2 15:04:07 host throttled request three\n\
             Jan  2 15:04:05 host throttled request one\n\
             Jan  2 15:04:06 host throttled request two\n",
        )
        .unwrap();

        let source = syslog_source(dir.path());
        let event = pattern_event(SyslogSource::NAME, r".*throttled request.*")
            .with_selector(MatchSelector::First);
        let results =
            tokio::runtime::Runtime::new().unwrap().block_on(source.find(&event)).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].line.contains("one"));
    }
}
