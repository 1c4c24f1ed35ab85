//! Pull request comment and review-request notifier.

use tracing::{debug, info, instrument};

use super::{render_comment, Notifier};
use crate::errors::NotificationError;
use crate::git::github::GitHubClient;
use crate::models::ConflictReport;

/// Posts reports back to the focal pull request on GitHub.
pub struct GitHubNotifier {
    client: GitHubClient,
    repo: String,
    post_comment: bool,
    request_reviewers: bool,
}

impl GitHubNotifier {
    pub fn new(client: GitHubClient, repo: impl Into<String>) -> Self {
        Self {
            client,
            repo: repo.into(),
            post_comment: true,
            request_reviewers: true,
        }
    }

    pub fn with_comment(mut self, enabled: bool) -> Self {
        self.post_comment = enabled;
        self
    }

    pub fn with_review_requests(mut self, enabled: bool) -> Self {
        self.request_reviewers = enabled;
        self
    }
}

impl Notifier for GitHubNotifier {
    #[instrument(skip_all, fields(pr = report.focal_id))]
    async fn publish(&self, report: &ConflictReport) -> Result<(), NotificationError> {
        let pr = report.focal_id;

        if self.post_comment {
            let body = render_comment(report);
            self.client
                .create_issue_comment(&self.repo, pr, &body)
                .await
                .map_err(|e| NotificationError::CommentFailed {
                    pr,
                    detail: e.to_string(),
                })?;
        }

        if self.request_reviewers && !report.reviewers.is_empty() {
            let reviewers: Vec<String> = report.reviewers.iter().cloned().collect();
            self.client
                .request_reviewers(&self.repo, pr, &reviewers)
                .await
                .map_err(|e| NotificationError::ReviewRequestFailed {
                    pr,
                    detail: e.to_string(),
                })?;
        } else {
            debug!("no reviewers to request");
        }

        info!(conflicts = report.records.len(), "report published");
        Ok(())
    }
}
