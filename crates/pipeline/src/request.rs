//! Change requests: the raw intake payload and its validated form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{GitHubLogin, RepositoryRef};

/// The request body as submitted by a caller.
///
/// Fields default to empty so a missing field surfaces as an [`InputError`]
/// naming that field rather than as a generic JSON error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// URL of the target repository.
    #[serde(default)]
    pub repository_url: String,
    /// Free-text description of the desired change.
    #[serde(default)]
    pub modification_prompt: String,
    /// Optional account to grant push access on the fork.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_username: Option<String>,
}

/// Rejections raised while validating a [`RequestPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The body was not valid JSON for a request.
    #[error("Invalid JSON: {0}")]
    Malformed(String),

    /// `repositoryUrl` was absent or blank.
    #[error("repositoryUrl is required")]
    MissingRepositoryUrl,

    /// `modificationPrompt` was absent or blank.
    #[error("modificationPrompt is required")]
    MissingModificationPrompt,

    /// `repositoryUrl` did not name an `owner/repo`.
    #[error("invalid repository URL format")]
    InvalidRepositoryUrl,
}

/// A validated, immutable change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    repository_url: String,
    repository: RepositoryRef,
    prompt: String,
    collaborator: Option<GitHubLogin>,
}

impl ChangeRequest {
    /// Parses and validates a JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, InputError> {
        let payload: RequestPayload =
            serde_json::from_slice(body).map_err(|e| InputError::Malformed(e.to_string()))?;
        Self::try_from(payload)
    }

    /// The URL exactly as submitted (trimmed).
    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    /// The upstream repository.
    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    /// The modification prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The collaborator to grant push access, if any.
    pub fn collaborator(&self) -> Option<&GitHubLogin> {
        self.collaborator.as_ref()
    }

    /// Converts back to the wire payload (used when queueing).
    pub fn to_payload(&self) -> RequestPayload {
        RequestPayload {
            repository_url: self.repository_url.clone(),
            modification_prompt: self.prompt.clone(),
            github_username: self.collaborator.as_ref().map(|c| c.to_string()),
        }
    }
}

impl TryFrom<RequestPayload> for ChangeRequest {
    type Error = InputError;

    fn try_from(payload: RequestPayload) -> Result<Self, Self::Error> {
        let repository_url = payload.repository_url.trim().to_string();
        if repository_url.is_empty() {
            return Err(InputError::MissingRepositoryUrl);
        }
        let prompt = payload.modification_prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(InputError::MissingModificationPrompt);
        }
        let repository =
            RepositoryRef::parse_url(&repository_url).ok_or(InputError::InvalidRepositoryUrl)?;
        let collaborator = payload
            .github_username
            .as_deref()
            .map(str::trim)
            .and_then(GitHubLogin::new);
        Ok(Self {
            repository_url,
            repository,
            prompt,
            collaborator,
        })
    }
}
