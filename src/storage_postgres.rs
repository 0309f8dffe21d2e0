use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};

use crate::document::Document;
use crate::error::StorageError;
use crate::storage::Storage;
use crate::types::{
    Delivery, DeliveryId, DeliveryStatus, Event, EventId, NewDelivery, NewEvent, RouteDescriptor,
    RouteId, Scope, Source, SourceId, TargetId, TeamId, UserId, Visibility,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS relay_sources (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        lookup_key TEXT NOT NULL UNIQUE,
        secret TEXT,
        visibility TEXT NOT NULL,
        team_id TEXT,
        owner_id TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS relay_targets (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        webhook_url TEXT NOT NULL,
        visibility TEXT NOT NULL,
        team_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS relay_routes (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL REFERENCES relay_sources(id),
        target_id TEXT NOT NULL REFERENCES relay_targets(id),
        message_template TEXT,
        visibility TEXT NOT NULL,
        team_id TEXT,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS relay_events (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        document JSONB NOT NULL,
        visibility TEXT NOT NULL,
        team_id TEXT,
        received_at TIMESTAMPTZ NOT NULL,
        processed_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS relay_deliveries (
        id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL REFERENCES relay_events(id),
        route_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        visibility TEXT NOT NULL,
        team_id TEXT,
        sent_at TIMESTAMPTZ
    )",
];

const ROUTE_SELECT: &str = "SELECT r.id AS route_id, r.message_template,
        r.visibility AS route_visibility, r.team_id AS route_team_id,
        t.id AS target_id, t.kind AS target_kind, t.webhook_url,
        t.visibility AS target_visibility, t.team_id AS target_team_id
     FROM relay_routes r
     JOIN relay_targets t ON t.id = r.target_id";

/// Postgres-backed [`Storage`].
pub struct PostgresStorage {
    client: Client,
}

fn backend(err: tokio_postgres::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn decode(err: impl std::fmt::Display) -> StorageError {
    StorageError::Decode(err.to_string())
}

fn scope_from(row: &Row, visibility: &str, team_id: &str) -> Result<Scope, StorageError> {
    let visibility: String = row.try_get(visibility).map_err(backend)?;
    let team_id: Option<String> = row.try_get(team_id).map_err(backend)?;
    Ok(Scope {
        visibility: visibility.parse::<Visibility>().map_err(decode)?,
        team_id: team_id.map(TeamId),
    })
}

fn team_param(scope: &Scope) -> Option<&str> {
    scope.team_id.as_ref().map(TeamId::as_str)
}

impl PostgresStorage {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        for statement in SCHEMA {
            client.execute(*statement, &[]).await?;
        }
        Ok(Self { client })
    }

    fn source_from(row: &Row) -> Result<Source, StorageError> {
        let kind: String = row.try_get("kind").map_err(backend)?;
        Ok(Source {
            id: SourceId(row.try_get("id").map_err(backend)?),
            kind: kind.parse().map_err(decode)?,
            lookup_key: row.try_get("lookup_key").map_err(backend)?,
            secret: row.try_get("secret").map_err(backend)?,
            scope: scope_from(row, "visibility", "team_id")?,
            owner_id: UserId(row.try_get("owner_id").map_err(backend)?),
            active: row.try_get("active").map_err(backend)?,
        })
    }

    fn route_from(row: &Row) -> Result<RouteDescriptor, StorageError> {
        let kind: String = row.try_get("target_kind").map_err(backend)?;
        Ok(RouteDescriptor {
            route_id: RouteId(row.try_get("route_id").map_err(backend)?),
            target_id: TargetId(row.try_get("target_id").map_err(backend)?),
            target_kind: kind.parse().map_err(decode)?,
            target_url: row.try_get("webhook_url").map_err(backend)?,
            message_template: row.try_get("message_template").map_err(backend)?,
            route_scope: scope_from(row, "route_visibility", "route_team_id")?,
            target_scope: scope_from(row, "target_visibility", "target_team_id")?,
        })
    }

    fn event_from(row: &Row) -> Result<Event, StorageError> {
        let document: serde_json::Value = row.try_get("document").map_err(backend)?;
        Ok(Event {
            id: EventId(row.try_get("id").map_err(backend)?),
            source_id: SourceId(row.try_get("source_id").map_err(backend)?),
            event_type: row.try_get("event_type").map_err(backend)?,
            document: Document::new(document),
            scope: scope_from(row, "visibility", "team_id")?,
            received_at: row.try_get("received_at").map_err(backend)?,
            processed_at: row.try_get("processed_at").map_err(backend)?,
        })
    }

    fn delivery_from(row: &Row) -> Result<Delivery, StorageError> {
        let status: String = row.try_get("status").map_err(backend)?;
        let attempts: i32 = row.try_get("attempts").map_err(backend)?;
        Ok(Delivery {
            id: DeliveryId(row.try_get("id").map_err(backend)?),
            event_id: EventId(row.try_get("event_id").map_err(backend)?),
            route_id: RouteId(row.try_get("route_id").map_err(backend)?),
            target_id: TargetId(row.try_get("target_id").map_err(backend)?),
            status: status.parse().map_err(decode)?,
            attempts: u32::try_from(attempts).map_err(decode)?,
            last_error: row.try_get("last_error").map_err(backend)?,
            scope: scope_from(row, "visibility", "team_id")?,
            sent_at: row.try_get("sent_at").map_err(backend)?,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn find_active_source_by_key(&self, key: &str) -> Result<Option<Source>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM relay_sources WHERE lookup_key = $1 AND active",
                &[&key],
            )
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::source_from).transpose()
    }

    async fn find_source(&self, id: &SourceId) -> Result<Option<Source>, StorageError> {
        let row = self
            .client
            .query_opt("SELECT * FROM relay_sources WHERE id = $1", &[&id.as_str()])
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::source_from).transpose()
    }

    async fn find_active_routes(
        &self,
        source_id: &SourceId,
        scope: &Scope,
    ) -> Result<Vec<RouteDescriptor>, StorageError> {
        let query = format!(
            "{ROUTE_SELECT}
             WHERE r.source_id = $1 AND r.active
               AND r.visibility = $2 AND t.visibility = $2
               AND ($2 = 'personal' OR (r.team_id = $3 AND t.team_id = $3))
             ORDER BY r.id"
        );
        let rows = self
            .client
            .query(
                &query,
                &[&source_id.as_str(), &scope.visibility.as_str(), &team_param(scope)],
            )
            .await
            .map_err(backend)?;
        rows.iter().map(Self::route_from).collect()
    }

    async fn load_route(&self, id: &RouteId) -> Result<Option<RouteDescriptor>, StorageError> {
        let query = format!("{ROUTE_SELECT} WHERE r.id = $1");
        let row = self
            .client
            .query_opt(&query, &[&id.as_str()])
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::route_from).transpose()
    }

    async fn create_event(&self, event: NewEvent) -> Result<EventId, StorageError> {
        let id = EventId::generate();
        self.client
            .execute(
                "INSERT INTO relay_events (id, source_id, event_type, document, visibility, team_id, received_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &id.as_str(),
                    &event.source_id.as_str(),
                    &event.event_type,
                    event.document.as_value(),
                    &event.scope.visibility.as_str(),
                    &team_param(&event.scope),
                    &event.received_at,
                ],
            )
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn mark_event_processed(&self, id: &EventId) -> Result<(), StorageError> {
        let now: DateTime<Utc> = Utc::now();
        let updated = self
            .client
            .execute(
                "UPDATE relay_events SET processed_at = $2 WHERE id = $1",
                &[&id.as_str(), &now],
            )
            .await
            .map_err(backend)?;
        if updated == 0 {
            return Err(StorageError::Missing {
                entity: "event",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn load_event(&self, id: &EventId) -> Result<Option<Event>, StorageError> {
        let row = self
            .client
            .query_opt("SELECT * FROM relay_events WHERE id = $1", &[&id.as_str()])
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::event_from).transpose()
    }

    async fn create_delivery(&self, delivery: NewDelivery) -> Result<DeliveryId, StorageError> {
        let id = DeliveryId::generate();
        self.client
            .execute(
                "INSERT INTO relay_deliveries (id, event_id, route_id, target_id, status, visibility, team_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &id.as_str(),
                    &delivery.event_id.as_str(),
                    &delivery.route_id.as_str(),
                    &delivery.target_id.as_str(),
                    &DeliveryStatus::Pending.as_str(),
                    &delivery.scope.visibility.as_str(),
                    &team_param(&delivery.scope),
                ],
            )
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn load_delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
        let row = self
            .client
            .query_opt("SELECT * FROM relay_deliveries WHERE id = $1", &[&id.as_str()])
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::delivery_from).transpose()
    }

    async fn increment_delivery_attempt(&self, id: &DeliveryId, ceiling: u32) -> Result<Option<u32>, StorageError> {
        let ceiling = i32::try_from(ceiling).map_err(decode)?;
        let row = self
            .client
            .query_opt(
                "UPDATE relay_deliveries SET attempts = attempts + 1
                 WHERE id = $1 AND status <> $2 AND attempts < $3
                 RETURNING attempts",
                &[&id.as_str(), &DeliveryStatus::Sent.as_str(), &ceiling],
            )
            .await
            .map_err(backend)?;
        if let Some(row) = row {
            let attempts: i32 = row.try_get(0).map_err(backend)?;
            return u32::try_from(attempts).map(Some).map_err(decode);
        }
        match self.load_delivery(id).await? {
            Some(_) => Ok(None),
            None => Err(StorageError::Missing {
                entity: "delivery",
                id: id.to_string(),
            }),
        }
    }

    async fn update_delivery_status(
        &self,
        id: &DeliveryId,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let sent_at: Option<DateTime<Utc>> = (status == DeliveryStatus::Sent).then(Utc::now);
        let updated = self
            .client
            .execute(
                "UPDATE relay_deliveries
                 SET status = $2, last_error = $3, sent_at = COALESCE($4, sent_at)
                 WHERE id = $1",
                &[&id.as_str(), &status.as_str(), &error, &sent_at],
            )
            .await
            .map_err(backend)?;
        if updated == 0 {
            return Err(StorageError::Missing {
                entity: "delivery",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
