//! Shared value types for the auto-pr-bot domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a repository reference always has both
//! an owner and a name, a change set maps contained paths to content) and
//! participate in domain computations.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::RepoPath;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from whole seconds since the Unix epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    pub fn from_unix_seconds(secs: i64) -> Self {
        Self(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Returns whole seconds since the Unix epoch.
    pub fn unix_seconds(self) -> i64 {
        self.0.timestamp()
    }

    /// Returns this timestamp shifted by `secs` seconds.
    pub fn plus_seconds(self, secs: i64) -> Self {
        Self::from_unix_seconds(self.unix_seconds() + secs)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// RFC 3339 rendering with whole-second precision.
    pub fn to_rfc3339(self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Source of the current time.
///
/// The rate limiter and progress tracker compute windows and expiries from
/// this, so tests can move time forward without sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<i64>);

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self(Mutex::new(start.unix_seconds()))
    }

    /// Moves the clock forward by `secs` seconds.
    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let now = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Timestamp::from_unix_seconds(*now)
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// A GitHub repository addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Account or organisation that owns the repository.
    pub owner: String,
    /// Repository name without any `.git` suffix.
    pub name: String,
}

impl RepositoryRef {
    /// Parses a repository URL.
    ///
    /// Accepts `https://github.com/owner/repo`, `http://…`, `github.com/owner/repo`
    /// and tolerates a trailing slash or `.git` suffix. Returns `None` when
    /// fewer than two non-empty path segments remain, or when the owner or
    /// name holds anything but ASCII letters, digits, `.`, `_` and `-`.
    pub fn parse_url(url: &str) -> Option<Self> {
        let mut rest = url.trim().trim_end_matches('/');
        for prefix in ["https://", "http://", "www.", "github.com/"] {
            rest = rest.strip_prefix(prefix).unwrap_or(rest);
        }
        let mut parts = rest.split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        let name = name.strip_suffix(".git").unwrap_or(name);
        if !is_repository_segment(owner) || !is_repository_segment(name) {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

/// Segments are spliced into REST paths and git URLs unescaped.
fn is_repository_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// File change set
// ---------------------------------------------------------------------------

/// Final file bodies produced by the generation stage, keyed by path.
///
/// Ordered so commit contents and the PR's file list are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChangeSet(BTreeMap<RepoPath, String>);

impl FileChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the replacement body for `path`, replacing any previous entry.
    pub fn insert(&mut self, path: RepoPath, content: String) {
        self.0.insert(path, content);
    }

    /// Number of files in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no file has been generated.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Paths in the set, in order.
    pub fn paths(&self) -> impl Iterator<Item = &RepoPath> {
        self.0.keys()
    }

    /// Path/content pairs, in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&RepoPath, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }
}
