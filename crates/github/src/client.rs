use std::time::Duration;

use async_trait::async_trait;
use pipeline::github::{HostedRepository, NewPullRequest, PullRequest, VcsError, VersionControlHost};
use pipeline::{BranchName, GitHubLogin, PullRequestNumber, RepositoryRef};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// Public GitHub API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
    /// API root, e.g. [`DEFAULT_API_BASE`] or a GitHub Enterprise `/api/v3` URL.
    pub api_base: String,
    pub timeout: Duration,
}

impl GitHubConfig {
    /// Settings for github.com.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// REST client implementing [`VersionControlHost`].
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Deserialize)]
struct UserBody {
    login: String,
}

#[derive(Deserialize)]
struct OwnerBody {
    login: String,
}

#[derive(Deserialize)]
struct RepositoryBody {
    name: String,
    owner: OwnerBody,
    html_url: String,
    clone_url: String,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

impl RepositoryBody {
    fn into_hosted(self) -> HostedRepository {
        HostedRepository {
            repository: RepositoryRef {
                owner: self.owner.login,
                name: self.name,
            },
            html_url: self.html_url,
            clone_url: self.clone_url,
            is_fork: self.fork,
        }
    }
}

#[derive(Deserialize)]
struct HeadBody {
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Deserialize)]
struct PullRequestBody {
    number: u64,
    html_url: String,
    head: HeadBody,
}

impl PullRequestBody {
    fn into_domain(self, operation: &str) -> Result<PullRequest, VcsError> {
        let head_ref = BranchName::new(self.head.reference).ok_or_else(|| VcsError::Decode {
            operation: operation.to_string(),
            message: format!("pull request #{} has an empty head ref", self.number),
        })?;
        Ok(PullRequest {
            number: PullRequestNumber::new(self.number),
            html_url: self.html_url,
            head_ref,
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl GitHubClient {
    /// Builds a client that sends `config.token` on every request.
    pub fn new(config: GitHubConfig) -> Result<Self, VcsError> {
        let build_error = |message: String| VcsError::Transport {
            operation: "build client".to_string(),
            message,
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("auto-pr-bot"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token.trim()))
            .map_err(|_| build_error("token is not a valid header value".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| build_error(e.to_string()))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, VcsError> {
        let response = request.send().await.map_err(|e| VcsError::Transport {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            debug!(operation, status = status.as_u16(), "github call succeeded");
            return Ok(response);
        }
        let raw = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .map(|body| body.message)
            .unwrap_or(raw);
        Err(VcsError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, VcsError> {
        let response = self.send(operation, request).await?;
        response.json::<T>().await.map_err(|e| VcsError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }

    async fn repository(&self, owner: &str, name: &str) -> Result<RepositoryBody, VcsError> {
        self.send_json(
            "get repository",
            self.http.get(self.url(&format!("/repos/{owner}/{name}"))),
        )
        .await
    }
}

#[async_trait]
impl VersionControlHost for GitHubClient {
    #[instrument(skip(self))]
    async fn authenticated_user(&self) -> Result<GitHubLogin, VcsError> {
        let user: UserBody = self
            .send_json("get authenticated user", self.http.get(self.url("/user")))
            .await?;
        GitHubLogin::new(user.login).ok_or_else(|| VcsError::Decode {
            operation: "get authenticated user".to_string(),
            message: "empty login".to_string(),
        })
    }

    #[instrument(skip_all, fields(upstream = %upstream))]
    async fn fork_repository(
        &self,
        upstream: &RepositoryRef,
    ) -> Result<HostedRepository, VcsError> {
        let login = self.authenticated_user().await?;
        match self.repository(login.as_str(), &upstream.name).await {
            Ok(existing) => {
                let hosted = existing.into_hosted();
                if !hosted.is_fork {
                    warn!(fork = %hosted.repository, "reusing a repository not marked as a fork");
                }
                info!(fork = %hosted.repository, "reusing existing fork");
                Ok(hosted)
            }
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                let created: RepositoryBody = self
                    .send_json(
                        "create fork",
                        self.http
                            .post(self.url(&format!(
                                "/repos/{}/{}/forks",
                                upstream.owner, upstream.name
                            )))
                            .json(&json!({ "default_branch_only": true })),
                    )
                    .await?;
                let hosted = created.into_hosted();
                info!(fork = %hosted.repository, "fork created");
                Ok(hosted)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all, fields(repository = %repository))]
    async fn default_branch(&self, repository: &RepositoryRef) -> Result<BranchName, VcsError> {
        let body = self.repository(&repository.owner, &repository.name).await?;
        body.default_branch
            .and_then(BranchName::new)
            .ok_or_else(|| VcsError::Decode {
                operation: "get repository".to_string(),
                message: format!("{repository} has no default branch"),
            })
    }

    #[instrument(skip_all, fields(base = %request.base_repository, head = %request.head))]
    async fn create_pull_request(
        &self,
        request: &NewPullRequest,
    ) -> Result<PullRequest, VcsError> {
        let repo = &request.base_repository;
        let body: PullRequestBody = self
            .send_json(
                "create pull request",
                self.http
                    .post(self.url(&format!("/repos/{}/{}/pulls", repo.owner, repo.name)))
                    .json(&json!({
                        "title": request.title,
                        "body": request.body,
                        "head": format!("{}:{}", request.head_owner, request.head),
                        "base": request.base.as_str(),
                    })),
            )
            .await?;
        body.into_domain("create pull request")
    }

    #[instrument(skip_all, fields(repository = %repository))]
    async fn list_open_pull_requests(
        &self,
        repository: &RepositoryRef,
        head_owner: &GitHubLogin,
        head: &BranchName,
    ) -> Result<Vec<PullRequest>, VcsError> {
        let head_filter = format!("{head_owner}:{head}");
        let bodies: Vec<PullRequestBody> = self
            .send_json(
                "list pull requests",
                self.http
                    .get(self.url(&format!(
                        "/repos/{}/{}/pulls",
                        repository.owner, repository.name
                    )))
                    .query(&[("state", "open"), ("head", head_filter.as_str())]),
            )
            .await?;
        bodies
            .into_iter()
            .map(|body| body.into_domain("list pull requests"))
            .collect()
    }

    #[instrument(skip_all, fields(repository = %repository, number = %number))]
    async fn close_pull_request(
        &self,
        repository: &RepositoryRef,
        number: PullRequestNumber,
        comment: &str,
    ) -> Result<(), VcsError> {
        self.send(
            "comment on pull request",
            self.http
                .post(self.url(&format!(
                    "/repos/{}/{}/issues/{number}/comments",
                    repository.owner, repository.name
                )))
                .json(&json!({ "body": comment })),
        )
        .await?;
        self.send(
            "close pull request",
            self.http
                .patch(self.url(&format!(
                    "/repos/{}/{}/pulls/{number}",
                    repository.owner, repository.name
                )))
                .json(&json!({ "state": "closed" })),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(repository = %repository, branch = %branch))]
    async fn delete_branch(
        &self,
        repository: &RepositoryRef,
        branch: &BranchName,
    ) -> Result<(), VcsError> {
        self.send(
            "delete branch",
            self.http.delete(self.url(&format!(
                "/repos/{}/{}/git/refs/heads/{branch}",
                repository.owner, repository.name
            ))),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(repository = %repository, user = %user))]
    async fn add_collaborator(
        &self,
        repository: &RepositoryRef,
        user: &GitHubLogin,
    ) -> Result<(), VcsError> {
        self.send(
            "add collaborator",
            self.http
                .put(self.url(&format!(
                    "/repos/{}/{}/collaborators/{user}",
                    repository.owner, repository.name
                )))
                .json(&json!({ "permission": "push" })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(GitHubConfig {
            token: "ghs_test".into(),
            api_base: server.base_url(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn widgets() -> RepositoryRef {
        RepositoryRef {
            owner: "acme".into(),
            name: "widgets".into(),
        }
    }

    fn repo_json(owner: &str, fork: bool) -> serde_json::Value {
        serde_json::json!({
            "name": "widgets",
            "owner": { "login": owner },
            "html_url": format!("https://github.com/{owner}/widgets"),
            "clone_url": format!("https://github.com/{owner}/widgets.git"),
            "fork": fork,
            "default_branch": "main"
        })
    }

    fn mock_user(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET)
                .path("/user")
                .header("authorization", "Bearer ghs_test")
                .header("x-github-api-version", "2022-11-28");
            then.status(200).json_body(serde_json::json!({ "login": "auto-pr-bot" }));
        })
    }

    #[tokio::test]
    async fn existing_fork_is_reused() {
        let server = MockServer::start();
        let user = mock_user(&server);
        let existing = server.mock(|when, then| {
            when.method(GET).path("/repos/auto-pr-bot/widgets");
            then.status(200).json_body(repo_json("auto-pr-bot", true));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/repos/acme/widgets/forks");
            then.status(202).json_body(repo_json("auto-pr-bot", true));
        });

        let fork = client(&server).fork_repository(&widgets()).await.unwrap();
        assert_eq!(fork.repository.to_string(), "auto-pr-bot/widgets");
        assert!(fork.is_fork);
        user.assert_calls(1);
        existing.assert_calls(1);
        create.assert_calls(0);
    }

    #[tokio::test]
    async fn missing_fork_is_created_for_default_branch_only() {
        let server = MockServer::start();
        mock_user(&server);
        server.mock(|when, then| {
            when.method(GET).path("/repos/auto-pr-bot/widgets");
            then.status(404).json_body(serde_json::json!({ "message": "Not Found" }));
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/forks")
                .body_includes("\"default_branch_only\":true");
            then.status(202).json_body(repo_json("auto-pr-bot", true));
        });

        let fork = client(&server).fork_repository(&widgets()).await.unwrap();
        assert_eq!(fork.clone_url, "https://github.com/auto-pr-bot/widgets.git");
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn fork_lookup_errors_other_than_not_found_propagate() {
        let server = MockServer::start();
        mock_user(&server);
        server.mock(|when, then| {
            when.method(GET).path("/repos/auto-pr-bot/widgets");
            then.status(403)
                .json_body(serde_json::json!({ "message": "Resource not accessible by integration" }));
        });

        let err = client(&server).fork_repository(&widgets()).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("Resource not accessible by integration"));
    }

    #[tokio::test]
    async fn open_pull_requests_are_filtered_by_head() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/pulls")
                .query_param("state", "open")
                .query_param("head", "auto-pr-bot:main");
            then.status(200).json_body(serde_json::json!([
                { "number": 12, "html_url": "https://github.com/acme/widgets/pull/12", "head": { "ref": "main" } }
            ]));
        });

        let prs = client(&server)
            .list_open_pull_requests(
                &widgets(),
                &GitHubLogin::new("auto-pr-bot").unwrap(),
                &BranchName::new("main").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].number.as_u64(), 12);
        assert_eq!(prs[0].head_ref.as_str(), "main");
        list.assert_calls(1);
    }

    #[tokio::test]
    async fn pull_request_head_is_qualified_with_fork_owner() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/pulls")
                .body_includes("\"head\":\"auto-pr-bot:auto-pr-bot/1700000000-1a2b3c4d\"")
                .body_includes("\"base\":\"main\"");
            then.status(201).json_body(serde_json::json!({
                "number": 13,
                "html_url": "https://github.com/acme/widgets/pull/13",
                "head": { "ref": "auto-pr-bot/1700000000-1a2b3c4d" }
            }));
        });

        let pr = client(&server)
            .create_pull_request(&NewPullRequest {
                base_repository: widgets(),
                head_owner: GitHubLogin::new("auto-pr-bot").unwrap(),
                head: BranchName::new("auto-pr-bot/1700000000-1a2b3c4d").unwrap(),
                base: BranchName::new("main").unwrap(),
                title: "Auto PR: Add CONTRIBUTING.md".into(),
                body: "This is an automated pull request.".into(),
            })
            .await
            .unwrap();
        assert_eq!(pr.html_url, "https://github.com/acme/widgets/pull/13");
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn closing_comments_before_closing() {
        let server = MockServer::start();
        let comment = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/issues/12/comments")
                .body_includes("Closing this PR");
            then.status(201).json_body(serde_json::json!({ "id": 1 }));
        });
        let close = server.mock(|when, then| {
            when.method(PATCH)
                .path("/repos/acme/widgets/pulls/12")
                .body_includes("\"state\":\"closed\"");
            then.status(200).json_body(serde_json::json!({ "number": 12 }));
        });

        client(&server)
            .close_pull_request(&widgets(), PullRequestNumber::new(12), "Closing this PR to create a new one")
            .await
            .unwrap();
        comment.assert_calls(1);
        close.assert_calls(1);
    }

    #[tokio::test]
    async fn branch_deletion_and_collaborator_grant_use_expected_routes() {
        let server = MockServer::start();
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path("/repos/auto-pr-bot/widgets/git/refs/heads/feature-x");
            then.status(204);
        });
        let grant = server.mock(|when, then| {
            when.method(PUT)
                .path("/repos/auto-pr-bot/widgets/collaborators/octocat")
                .body_includes("\"permission\":\"push\"");
            then.status(201).json_body(serde_json::json!({ "id": 5 }));
        });

        let fork = RepositoryRef {
            owner: "auto-pr-bot".into(),
            name: "widgets".into(),
        };
        let client = client(&server);
        client
            .delete_branch(&fork, &BranchName::new("feature-x").unwrap())
            .await
            .unwrap();
        client
            .add_collaborator(&fork, &GitHubLogin::new("octocat").unwrap())
            .await
            .unwrap();
        delete.assert_calls(1);
        grant.assert_calls(1);
    }

    #[tokio::test]
    async fn default_branch_is_read_from_repository() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets");
            then.status(200).json_body(repo_json("acme", false));
        });

        let branch = client(&server).default_branch(&widgets()).await.unwrap();
        assert_eq!(branch.as_str(), "main");
    }
}
