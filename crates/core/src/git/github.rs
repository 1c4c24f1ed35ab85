//! GitHub REST API client.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::conflict::patch::parse_hunks;
use crate::engine::ProposalSource;
use crate::errors::{CoreError, GitHubError};
use crate::models::{ChangeProposalRef, ChangeSet};

const PER_PAGE: usize = 100;
/// GitHub stops listing pull request files after 3000 entries.
const MAX_PAGES: u32 = 30;
const MAX_LISTED_FILES: usize = PER_PAGE * MAX_PAGES as usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUserSummary {
    pub login: String,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub state: String,
    pub user: Option<GitHubUserSummary>,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// One entry of `GET /repos/{owner}/{repo}/pulls/{n}/files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub previous_filename: Option<String>,
    /// Unified-diff hunks; absent for binary or very large files.
    #[serde(default)]
    pub patch: Option<String>,
}

impl From<PullRequest> for ChangeProposalRef {
    fn from(pr: PullRequest) -> Self {
        Self {
            id: pr.number,
            branch: pr.head.ref_name,
            author: pr.user.map(|u| u.login).unwrap_or_default(),
            title: pr.title,
            html_url: Some(pr.html_url),
        }
    }
}

/// Build a change set from a pull request's file listing.
pub fn change_set_from_files(proposal_id: u64, files: Vec<PullRequestFile>) -> ChangeSet {
    let mut paths = Vec::new();
    let mut hunks = BTreeMap::new();
    for file in files {
        if let Some(previous) = file.previous_filename {
            paths.push(previous);
        }
        match file.patch {
            Some(patch) => {
                hunks.insert(file.filename, parse_hunks(&patch));
            }
            None => {
                debug!(file = %file.filename, status = %file.status, "file has no patch");
                paths.push(file.filename);
            }
        }
    }
    ChangeSet::new(proposal_id, paths, hunks)
}

/// Whether a file listing of `count` entries may have been cut off by the API.
fn listing_truncated(count: usize) -> bool {
    count >= MAX_LISTED_FILES
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("mergewatch/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build reqwest client");
        info!(api_url = %api_url, "created GitHubClient");
        Self {
            http,
            api_url,
            token,
        }
    }

    /// List all open pull requests of `repo`.
    #[instrument(skip(self))]
    pub async fn list_open_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, GitHubError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, repo);
        let prs: Vec<PullRequest> = self.get_paginated(&url, &[("state", "open")]).await?;
        debug!(count = prs.len(), "fetched open pull requests");
        Ok(prs)
    }

    /// List the changed files of a pull request, with their patches.
    #[instrument(skip(self))]
    pub async fn get_pull_request_files(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        let url = format!("{}/repos/{}/pulls/{}/files", self.api_url, repo, pr_number);
        let files: Vec<PullRequestFile> = self.get_paginated(&url, &[]).await?;
        debug!(count = files.len(), pr_number, "fetched pull request files");
        Ok(files)
    }

    /// Fetch the full unified diff of a pull request.
    #[instrument(skip(self))]
    pub async fn get_pull_request_diff(&self, repo: &str, pr_number: u64) -> Result<String, GitHubError> {
        let url = format!("{}/repos/{}/pulls/{}", self.api_url, repo, pr_number);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github.diff")
            .send()
            .await?;
        self.check_response(&resp)?;
        let diff = resp.text().await?;
        debug!(bytes = diff.len(), pr_number, "fetched pull request diff");
        Ok(diff)
    }

    /// Post a comment on a pull request's conversation.
    #[instrument(skip(self, body))]
    pub async fn create_issue_comment(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/issues/{}/comments", self.api_url, repo, pr_number);
        let payload = serde_json::json!({ "body": body });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        info!(pr_number, "posted comment");
        Ok(())
    }

    /// Request reviews from `reviewers` on a pull request.
    #[instrument(skip(self))]
    pub async fn request_reviewers(
        &self,
        repo: &str,
        pr_number: u64,
        reviewers: &[String],
    ) -> Result<(), GitHubError> {
        let url = format!(
            "{}/repos/{}/pulls/{}/requested_reviewers",
            self.api_url, repo, pr_number
        );
        let payload = serde_json::json!({ "reviewers": reviewers });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        info!(pr_number, count = reviewers.len(), "requested reviewers");
        Ok(())
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GitHubError> {
        let per_page = PER_PAGE.to_string();
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let page_str = page.to_string();
            let resp = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                .send()
                .await?;
            self.check_response(&resp)?;
            let batch: Vec<T> = resp
                .json()
                .await
                .map_err(|e| GitHubError::ParseError(e.to_string()))?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
        }
        warn!(url, pages = MAX_PAGES, "pagination limit reached");
        Ok(items)
    }

    fn check_response(&self, resp: &reqwest::Response) -> Result<(), GitHubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GitHubError::AuthenticationFailed(format!(
                "HTTP {}",
                status
            )));
        }
        if status.as_u16() == 429 {
            let reset = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(GitHubError::RateLimited { reset_at: reset });
        }
        Err(GitHubError::ApiError {
            status: status.as_u16(),
            body: format!("HTTP {}", status),
        })
    }
}

/// A [`GitHubClient`] bound to one repository.
#[derive(Clone)]
pub struct GitHubRepo {
    client: GitHubClient,
    repo: String,
}

impl GitHubRepo {
    pub fn new(client: GitHubClient, repo: impl Into<String>) -> Self {
        Self {
            client,
            repo: repo.into(),
        }
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl ProposalSource for GitHubRepo {
    async fn list_open_proposals(&self) -> Result<Vec<ChangeProposalRef>, CoreError> {
        let prs = self.client.list_open_pull_requests(&self.repo).await?;
        Ok(prs.into_iter().map(ChangeProposalRef::from).collect())
    }

    async fn get_change_set(&self, id: u64) -> Result<ChangeSet, CoreError> {
        let files = self.client.get_pull_request_files(&self.repo, id).await?;
        if !listing_truncated(files.len()) {
            return Ok(change_set_from_files(id, files));
        }
        warn!(
            pr_number = id,
            listed = files.len(),
            "file listing truncated, falling back to the full diff"
        );
        let diff = self.client.get_pull_request_diff(&self.repo, id).await?;
        Ok(ChangeSet::from_unified_diff(id, &diff))
    }
}
