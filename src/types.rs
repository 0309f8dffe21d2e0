use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a configured inbound [`Source`].
    SourceId
);
string_id!(
    /// Identifier of a configured outbound [`Target`].
    TargetId
);
string_id!(
    /// Identifier of a [`Route`] linking a source to a target.
    RouteId
);
string_id!(
    /// Identifier of an accepted inbound [`Event`].
    EventId
);
string_id!(
    /// Identifier of one [`Delivery`] row.
    DeliveryId
);
string_id!(TeamId);
string_id!(UserId);

/// Who may see a source, target, route or anything derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Personal,
    Team,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Personal => "personal",
            Visibility::Team => "team",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Visibility::Personal),
            "team" => Ok(Visibility::Team),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

/// Visibility classification shared by every pipeline record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
}

impl Scope {
    pub fn personal() -> Self {
        Self {
            visibility: Visibility::Personal,
            team_id: None,
        }
    }

    pub fn team(team_id: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Team,
            team_id: Some(TeamId(team_id.into())),
        }
    }

    /// Scope equality as routing understands it: same visibility, and the
    /// same team when team-scoped. `team_id` is ignored for personal scopes.
    pub fn matches(&self, other: &Scope) -> bool {
        if self.visibility != other.visibility {
            return false;
        }
        match self.visibility {
            Visibility::Personal => true,
            Visibility::Team => self.team_id == other.team_id,
        }
    }
}

/// Vendor family of an inbound webhook producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Hypervisor backup notifications (vzdump).
    Proxmox,
    /// CI system events.
    Gitlab,
    /// Storage appliance free-text notifications.
    Synology,
    /// Container update agent reports.
    Watchtower,
    /// Media managers posting `eventType` payloads.
    Arr,
    /// Uptime monitor heartbeats.
    UptimeKuma,
    #[serde(other)]
    Generic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Proxmox => "proxmox",
            SourceKind::Gitlab => "gitlab",
            SourceKind::Synology => "synology",
            SourceKind::Watchtower => "watchtower",
            SourceKind::Arr => "arr",
            SourceKind::UptimeKuma => "uptime_kuma",
            SourceKind::Generic => "generic",
        }
    }

    /// Header carrying the shared secret for this kind.
    pub fn secret_header(&self) -> &'static str {
        match self {
            SourceKind::Gitlab => "x-gitlab-token",
            _ => "x-webhook-secret",
        }
    }
}

impl FromStr for SourceKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "proxmox" => SourceKind::Proxmox,
            "gitlab" => SourceKind::Gitlab,
            "synology" => SourceKind::Synology,
            "watchtower" => SourceKind::Watchtower,
            "arr" => SourceKind::Arr,
            "uptime_kuma" => SourceKind::UptimeKuma,
            _ => SourceKind::Generic,
        })
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination family of an outbound target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Slack,
    Mattermost,
    Rocketchat,
    Discord,
    Teams,
    Webhook,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Slack => "slack",
            TargetKind::Mattermost => "mattermost",
            TargetKind::Rocketchat => "rocketchat",
            TargetKind::Discord => "discord",
            TargetKind::Teams => "teams",
            TargetKind::Webhook => "webhook",
        }
    }

    /// Destinations that render structured attachments natively.
    pub fn supports_attachments(&self) -> bool {
        matches!(
            self,
            TargetKind::Slack | TargetKind::Mattermost | TargetKind::Rocketchat | TargetKind::Webhook
        )
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(TargetKind::Slack),
            "mattermost" => Ok(TargetKind::Mattermost),
            "rocketchat" => Ok(TargetKind::Rocketchat),
            "discord" => Ok(TargetKind::Discord),
            "teams" => Ok(TargetKind::Teams),
            "webhook" => Ok(TargetKind::Webhook),
            other => Err(format!("unknown target kind: {other}")),
        }
    }
}

/// Configured inbound webhook producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub kind: SourceKind,
    /// Opaque lookup key taken from the inbound URL path.
    pub lookup_key: String,
    /// Optional shared secret the sender must present.
    #[serde(default)]
    pub secret: Option<String>,
    pub scope: Scope,
    pub owner_id: UserId,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Source {
    pub fn new(
        id: impl Into<String>,
        kind: SourceKind,
        lookup_key: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: SourceId(id.into()),
            kind,
            lookup_key: lookup_key.into(),
            secret: None,
            scope: Scope::personal(),
            owner_id: UserId(owner_id.into()),
            active: true,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Configured outbound destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub webhook_url: String,
    pub scope: Scope,
}

impl Target {
    pub fn new(id: impl Into<String>, kind: TargetKind, webhook_url: impl Into<String>) -> Self {
        Self {
            id: TargetId(id.into()),
            kind,
            webhook_url: webhook_url.into(),
            scope: Scope::personal(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// Active link from one source to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub source_id: SourceId,
    pub target_id: TargetId,
    #[serde(default)]
    pub message_template: Option<String>,
    pub scope: Scope,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Route {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            id: RouteId(id.into()),
            source_id: SourceId(source_id.into()),
            target_id: TargetId(target_id.into()),
            message_template: None,
            scope: Scope::personal(),
            active: true,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

fn default_active() -> bool {
    true
}

/// A route joined with its target, as returned by route lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub route_id: RouteId,
    pub target_id: TargetId,
    pub target_kind: TargetKind,
    pub target_url: String,
    pub message_template: Option<String>,
    pub route_scope: Scope,
    pub target_scope: Scope,
}

/// Accepted inbound request, persisted once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub source_id: SourceId,
    pub event_type: String,
    pub document: Document,
    pub scope: Scope,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating an [`Event`].
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub source_id: SourceId,
    pub event_type: String,
    pub document: Document,
    pub scope: Scope,
    pub received_at: DateTime<Utc>,
}

/// Delivery lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retry,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retry => "retry",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "retry" => Ok(DeliveryStatus::Retry),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transmission of one event to one target via one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub event_id: EventId,
    pub route_id: RouteId,
    pub target_id: TargetId,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub scope: Scope,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a [`Delivery`].
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub event_id: EventId,
    pub route_id: RouteId,
    pub target_id: TargetId,
    /// Copied from the owning event.
    pub scope: Scope,
}

/// Inbound request headers, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.insert(name, value);
        }
        headers
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
