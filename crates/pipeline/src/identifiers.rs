//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`BranchName`] with a [`GitHubLogin`] even though both are strings under
//! the hood.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Timestamp;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (GitHub-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: GitHub-integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies a pull request within its base repository.
    PullRequestNumber
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one accepted change request.
///
/// Minted by the dispatch bridge when a request passes the rate limiter, and
/// carried on the queued task so the asynchronous run reports progress under
/// the same key the caller polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`RequestId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parses a caller-supplied identifier (e.g. a status path element).
    ///
    /// Returns `None` for anything that is not a UUID; such identifiers can
    /// never have been minted, so callers treat them as not found.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }

    /// First eight hex characters, used where a short unique suffix is enough.
    pub fn short(self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (Git and GitHub names)
// ---------------------------------------------------------------------------

string_id! {
    /// A Git branch name (e.g. `"main"`, `"auto-pr-bot/1700000000-1a2b3c4d"`).
    BranchName
}

impl BranchName {
    /// Per-run branch name: `{prefix}/{unix_seconds}-{short request id}`.
    ///
    /// The request suffix keeps two runs started in the same second apart.
    pub fn for_run(prefix: &str, at: Timestamp, request: RequestId) -> Self {
        Self(format!("{prefix}/{}-{}", at.unix_seconds(), request.short()))
    }
}

string_id! {
    /// A GitHub account login (the bot itself, or a collaborator).
    GitHubLogin
}

string_id! {
    /// The address a request was received from, as used for rate limiting.
    ClientAddress
}

impl ClientAddress {
    /// Address recorded when the caller cannot be identified.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    /// The first `X-Forwarded-For` entry, else the peer address, else `unknown`.
    pub fn resolve(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Self {
        forwarded_for
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .and_then(|first| Self::new(first))
            .or_else(|| peer.map(|ip| Self(ip.to_string())))
            .unwrap_or_else(Self::unknown)
    }
}

string_id! {
    /// A file-system path relative to the repository root, using `/` separators.
    RepoPath
}

impl RepoPath {
    /// Returns `true` if the path is safe to read or write inside a checkout.
    ///
    /// Absolute paths, parent-directory components and anything under `.git`
    /// are rejected.
    pub fn is_contained(&self) -> bool {
        let raw = self.0.as_str();
        if raw.starts_with('/') || raw.starts_with('\\') || raw.contains(':') {
            return false;
        }
        let mut any = false;
        for component in raw.split(['/', '\\']).filter(|c| !c.is_empty() && *c != ".") {
            if component == ".." || component == ".git" {
                return false;
            }
            any = true;
        }
        any
    }
}
