//! CI system events (pipelines, pushes, merge requests, issues).

use super::{summarize_list, CanonicalMessage, Severity};
use crate::document::Document;
use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Success,
    Failed,
    Canceled,
    Running,
    Pending,
    Unknown,
}

impl PipelineStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "passed" => PipelineStatus::Success,
            "failed" => PipelineStatus::Failed,
            "canceled" | "cancelled" => PipelineStatus::Canceled,
            "running" => PipelineStatus::Running,
            "pending" | "created" | "waiting_for_resource" | "preparing" | "scheduled" | "manual" => {
                PipelineStatus::Pending
            }
            _ => PipelineStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Running => "running",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Unknown => "unknown",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            PipelineStatus::Success => "✅",
            PipelineStatus::Failed => "❌",
            PipelineStatus::Canceled => "⛔",
            PipelineStatus::Running => "🔄",
            PipelineStatus::Pending => "⏳",
            PipelineStatus::Unknown => "❔",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStatus::Success => "succeeded",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "was canceled",
            PipelineStatus::Running => "is running",
            PipelineStatus::Pending => "is pending",
            PipelineStatus::Unknown => "changed state",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PipelineStatus::Failed => Severity::Error,
            PipelineStatus::Canceled => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// `refs/heads/main` → `main`, `refs/tags/v1` → `v1`.
pub fn branch_name(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Fields every CI message carries when the payload has them.
struct Identity {
    project: String,
    branch: Option<String>,
    commit: Option<String>,
    url: Option<String>,
}

impl Identity {
    fn read(doc: &Document, ref_paths: &[&str], sha_paths: &[&str], url_paths: &[&str]) -> Self {
        Self {
            project: doc
                .first_str(&["project.name", "project.path_with_namespace", "project_name", "repository.name"])
                .unwrap_or("unknown project")
                .to_string(),
            branch: doc.first_str(ref_paths).map(|r| branch_name(r).to_string()),
            commit: doc.first_str(sha_paths).map(|s| short_sha(s).to_string()),
            url: doc.first_str(url_paths).map(str::to_string),
        }
    }

    fn apply(self, mut message: CanonicalMessage) -> CanonicalMessage {
        message = message.with_field("project", self.project);
        if let Some(branch) = self.branch {
            message = message.with_field("branch", branch);
        }
        if let Some(commit) = self.commit {
            message = message.with_field("commit", commit);
        }
        if let Some(url) = self.url {
            message = message.with_field("url", url);
        }
        message
    }
}

pub fn format(doc: &Document, event_type: &str) -> Result<CanonicalMessage, FormatError> {
    if !doc.is_object() {
        return Err(FormatError::NotAnObject);
    }
    let kind = doc.str_at("object_kind").unwrap_or(event_type);
    Ok(match kind {
        "pipeline" => pipeline(doc),
        "push" | "tag_push" => push(doc, kind == "tag_push"),
        "merge_request" => merge_request(doc),
        "issue" => issue(doc),
        "repository_update" => repository_update(doc),
        other => fallback(doc, other),
    })
}

fn pipeline(doc: &Document) -> CanonicalMessage {
    let status = PipelineStatus::parse(doc.str_at("object_attributes.status").unwrap_or_default());
    let id = doc.scalar_at("object_attributes.id").unwrap_or_else(|| "?".to_string());
    let mut identity = Identity::read(
        doc,
        &["object_attributes.ref", "ref"],
        &["object_attributes.sha", "commit.id"],
        &["object_attributes.url"],
    );
    if identity.url.is_none() {
        identity.url = doc
            .str_at("project.web_url")
            .map(|base| format!("{base}/-/pipelines/{id}"));
    }

    let branch = identity
        .branch
        .as_deref()
        .map(|b| format!(" on {b}"))
        .unwrap_or_default();
    let mut message = format!("Pipeline #{id} {} for {}{branch}", status.label(), identity.project);
    if let Some(duration) = doc.i64_at("object_attributes.duration") {
        message.push_str(&format!(" in {duration}s"));
    }

    identity.apply(CanonicalMessage {
        title: Some(format!("{} Pipeline {}", status.icon(), status.label())),
        message: Some(message),
        severity: Some(status.severity()),
        status: Some(status.as_str().to_string()),
        ..Default::default()
    })
}

fn push(doc: &Document, tag: bool) -> CanonicalMessage {
    let identity = Identity::read(doc, &["ref"], &["checkout_sha", "after"], &["project.web_url"]);
    let user = doc.first_str(&["user_name", "user_username"]).unwrap_or("someone");
    let branch = identity.branch.clone().unwrap_or_default();

    let (title, message) = if tag {
        (
            format!("🏷️ Tag {branch} pushed"),
            format!("{user} pushed tag {branch} to {}", identity.project),
        )
    } else {
        let count = doc
            .i64_at("total_commits_count")
            .unwrap_or(doc.array_at("commits").len() as i64);
        let mut message = format!("{user} pushed {count} commit(s) to {}/{branch}", identity.project);
        let subjects: Vec<String> = doc
            .array_at("commits")
            .iter()
            .filter_map(|c| c.get("message").and_then(|m| m.as_str()))
            .map(|m| m.lines().next().unwrap_or_default().trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if !subjects.is_empty() {
            message.push_str(": ");
            message.push_str(&summarize_list(&subjects));
        }
        (format!("📦 Push to {}", identity.project), message)
    };

    identity.apply(CanonicalMessage {
        title: Some(title),
        message: Some(message),
        severity: Some(Severity::Info),
        status: Some("pushed".to_string()),
        ..Default::default()
    })
}

fn merge_request(doc: &Document) -> CanonicalMessage {
    let identity = Identity::read(
        doc,
        &["object_attributes.source_branch"],
        &["object_attributes.last_commit.id"],
        &["object_attributes.url"],
    );
    let iid = doc.scalar_at("object_attributes.iid").unwrap_or_else(|| "?".to_string());
    let title = doc.str_at("object_attributes.title").unwrap_or("untitled");
    let state = doc.str_at("object_attributes.state").unwrap_or("unknown");
    let action = doc.str_at("object_attributes.action").unwrap_or(state);
    let target = doc.str_at("object_attributes.target_branch").unwrap_or("?");
    let user = doc.first_str(&["user.name", "user.username"]).unwrap_or("someone");

    let severity = match action {
        "merge" | "merged" => Severity::Success,
        "close" | "closed" => Severity::Warning,
        _ => Severity::Info,
    };
    let source = identity.branch.clone().unwrap_or_else(|| "?".to_string());

    identity.apply(CanonicalMessage {
        title: Some(format!("🔀 Merge request !{iid} {action}")),
        message: Some(format!("{user}: {title} ({source} → {target})")),
        severity: Some(severity),
        status: Some(state.to_string()),
        ..Default::default()
    })
}

fn issue(doc: &Document) -> CanonicalMessage {
    let identity = Identity::read(doc, &[], &[], &["object_attributes.url"]);
    let iid = doc.scalar_at("object_attributes.iid").unwrap_or_else(|| "?".to_string());
    let title = doc.str_at("object_attributes.title").unwrap_or("untitled");
    let state = doc.str_at("object_attributes.state").unwrap_or("unknown");
    let action = doc.str_at("object_attributes.action").unwrap_or(state);
    let user = doc.first_str(&["user.name", "user.username"]).unwrap_or("someone");

    identity.apply(CanonicalMessage {
        title: Some(format!("📝 Issue #{iid} {action}")),
        message: Some(format!("{user}: {title}")),
        severity: Some(Severity::Info),
        status: Some(state.to_string()),
        ..Default::default()
    })
}

fn repository_update(doc: &Document) -> CanonicalMessage {
    let identity = Identity::read(doc, &["refs.0", "changes.0.ref"], &["changes.0.after"], &["project.web_url"]);
    let refs: Vec<String> = doc
        .array_at("changes")
        .iter()
        .filter_map(|c| c.get("ref").and_then(|r| r.as_str()))
        .map(|r| branch_name(r).to_string())
        .collect();
    let user = doc.first_str(&["user_name", "user.name"]).unwrap_or("someone");
    let mut message = format!("{user} updated {}", identity.project);
    if !refs.is_empty() {
        message.push_str(&format!(" ({})", summarize_list(&refs)));
    }

    identity.apply(CanonicalMessage {
        title: Some("🗂️ Repository updated".to_string()),
        message: Some(message),
        severity: Some(Severity::Info),
        status: Some("updated".to_string()),
        ..Default::default()
    })
}

fn fallback(doc: &Document, kind: &str) -> CanonicalMessage {
    let identity = Identity::read(doc, &["ref", "object_attributes.ref"], &["checkout_sha"], &["project.web_url"]);
    let message = format!("{kind} event on {}", identity.project);
    identity.apply(CanonicalMessage {
        title: Some(format!("GitLab {kind}")),
        message: Some(message),
        severity: Some(Severity::Info),
        status: doc.str_at("object_attributes.status").map(str::to_string),
        ..Default::default()
    })
}
