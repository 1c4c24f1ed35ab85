//! Publishing conflict reports.
//!
//! A report is rendered once as Markdown and handed to a [`Notifier`]. The
//! GitHub notifier posts it as a comment on the focal pull request and asks
//! the authors of the conflicting pull requests to review.

pub mod github;

use std::fmt::Write as _;
use std::future::Future;

use crate::conflict::ranges::format_line_ranges;
use crate::errors::NotificationError;
use crate::models::ConflictReport;

pub use github::GitHubNotifier;

/// Delivers a finished [`ConflictReport`] somewhere.
pub trait Notifier: Send + Sync {
    fn publish(
        &self,
        report: &ConflictReport,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;
}

/// Render the Markdown comment body for `report`.
///
/// A report without conflicts renders as a short all-clear message.
pub fn render_comment(report: &ConflictReport) -> String {
    let mut body = String::new();

    if !report.has_conflicts() {
        let _ = writeln!(
            body,
            ":white_check_mark: No conflicts with other open pull requests ({} strategy).",
            report.strategy
        );
        append_skipped(&mut body, report);
        return body;
    }

    let _ = writeln!(
        body,
        ":warning: This pull request conflicts with {} other open pull request(s) ({} strategy).\n",
        report.records.len(),
        report.strategy
    );

    for record in &report.records {
        let other = &record.other;
        match &other.html_url {
            Some(url) => {
                let _ = write!(body, "- [#{}]({})", other.id, url);
            }
            None => {
                let _ = write!(body, "- #{}", other.id);
            }
        }
        if !other.title.is_empty() {
            let _ = write!(body, " {}", other.title);
        }
        if !other.author.is_empty() {
            let _ = write!(body, " by @{}", other.author);
        }
        body.push('\n');

        for (path, lines) in &record.conflicting_files {
            let _ = writeln!(body, "  - `{}` lines {}", path, format_line_ranges(lines));
        }
    }

    append_skipped(&mut body, report);
    body
}

fn append_skipped(body: &mut String, report: &ConflictReport) {
    if report.skipped.is_empty() {
        return;
    }
    let _ = writeln!(body, "\n<details><summary>Could not check {} pull request(s)</summary>\n", report.skipped.len());
    for skipped in &report.skipped {
        let _ = writeln!(body, "- #{}: {}", skipped.proposal_id, skipped.reason);
    }
    body.push_str("\n</details>\n");
}
