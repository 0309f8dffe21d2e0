use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::types::{
    Delivery, DeliveryId, DeliveryStatus, Event, EventId, NewDelivery, NewEvent, Route,
    RouteDescriptor, RouteId, Scope, Source, SourceId, Target, TargetId,
};

/// Persistence collaborator backing the pipeline.
///
/// Source, target and route rows are owned elsewhere; this crate only reads
/// them. Events and deliveries are created here and only move forward.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Exactly one active source whose lookup key equals `key`.
    async fn find_active_source_by_key(&self, key: &str) -> Result<Option<Source>, StorageError>;

    async fn find_source(&self, id: &SourceId) -> Result<Option<Source>, StorageError>;

    /// Active routes of `source_id`, joined with their targets, whose scope
    /// (and target scope) equal `scope`.
    async fn find_active_routes(
        &self,
        source_id: &SourceId,
        scope: &Scope,
    ) -> Result<Vec<RouteDescriptor>, StorageError>;

    async fn load_route(&self, id: &RouteId) -> Result<Option<RouteDescriptor>, StorageError>;

    async fn create_event(&self, event: NewEvent) -> Result<EventId, StorageError>;

    async fn mark_event_processed(&self, id: &EventId) -> Result<(), StorageError>;

    async fn load_event(&self, id: &EventId) -> Result<Option<Event>, StorageError>;

    async fn create_delivery(&self, delivery: NewDelivery) -> Result<DeliveryId, StorageError>;

    async fn load_delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError>;

    /// Persist `attempts + 1` and return the new count, unless the delivery
    /// is already sent or has reached `ceiling`, in which case nothing changes
    /// and `None` is returned.
    async fn increment_delivery_attempt(&self, id: &DeliveryId, ceiling: u32) -> Result<Option<u32>, StorageError>;

    /// Set status and error. `sent_at` is stamped when moving to `sent`.
    async fn update_delivery_status(
        &self,
        id: &DeliveryId,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<(), StorageError>;
}

/// In-memory storage for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryStorage {
    sources: RwLock<HashMap<SourceId, Source>>,
    targets: RwLock<HashMap<TargetId, Target>>,
    routes: RwLock<Vec<Route>>,
    events: RwLock<HashMap<EventId, Event>>,
    deliveries: RwLock<Vec<Delivery>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_source(&self, source: Source) {
        self.sources.write().await.insert(source.id.clone(), source);
    }

    pub async fn insert_target(&self, target: Target) {
        self.targets.write().await.insert(target.id.clone(), target);
    }

    pub async fn insert_route(&self, route: Route) {
        let mut routes = self.routes.write().await;
        routes.retain(|r| r.id != route.id);
        routes.push(route);
    }

    pub async fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.read().await.values().cloned().collect();
        events.sort_by_key(|e| e.received_at);
        events
    }

    pub async fn deliveries_for_event(&self, event_id: &EventId) -> Vec<Delivery> {
        self.deliveries
            .read()
            .await
            .iter()
            .filter(|d| &d.event_id == event_id)
            .cloned()
            .collect()
    }

    fn describe(route: &Route, target: &Target) -> RouteDescriptor {
        RouteDescriptor {
            route_id: route.id.clone(),
            target_id: target.id.clone(),
            target_kind: target.kind,
            target_url: target.webhook_url.clone(),
            message_template: route.message_template.clone(),
            route_scope: route.scope.clone(),
            target_scope: target.scope.clone(),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_active_source_by_key(&self, key: &str) -> Result<Option<Source>, StorageError> {
        let sources = self.sources.read().await;
        Ok(sources
            .values()
            .find(|s| s.active && s.lookup_key == key)
            .cloned())
    }

    async fn find_source(&self, id: &SourceId) -> Result<Option<Source>, StorageError> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn find_active_routes(
        &self,
        source_id: &SourceId,
        scope: &Scope,
    ) -> Result<Vec<RouteDescriptor>, StorageError> {
        let routes = self.routes.read().await;
        let targets = self.targets.read().await;
        Ok(routes
            .iter()
            .filter(|r| r.active && &r.source_id == source_id && r.scope.matches(scope))
            .filter_map(|r| {
                let target = targets.get(&r.target_id)?;
                target.scope.matches(scope).then(|| Self::describe(r, target))
            })
            .collect())
    }

    async fn load_route(&self, id: &RouteId) -> Result<Option<RouteDescriptor>, StorageError> {
        let routes = self.routes.read().await;
        let targets = self.targets.read().await;
        Ok(routes.iter().find(|r| &r.id == id).and_then(|r| {
            targets.get(&r.target_id).map(|t| Self::describe(r, t))
        }))
    }

    async fn create_event(&self, event: NewEvent) -> Result<EventId, StorageError> {
        let id = EventId::generate();
        let row = Event {
            id: id.clone(),
            source_id: event.source_id,
            event_type: event.event_type,
            document: event.document,
            scope: event.scope,
            received_at: event.received_at,
            processed_at: None,
        };
        self.events.write().await.insert(id.clone(), row);
        Ok(id)
    }

    async fn mark_event_processed(&self, id: &EventId) -> Result<(), StorageError> {
        let mut events = self.events.write().await;
        let event = events.get_mut(id).ok_or_else(|| StorageError::Missing {
            entity: "event",
            id: id.to_string(),
        })?;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn load_event(&self, id: &EventId) -> Result<Option<Event>, StorageError> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn create_delivery(&self, delivery: NewDelivery) -> Result<DeliveryId, StorageError> {
        let id = DeliveryId::generate();
        self.deliveries.write().await.push(Delivery {
            id: id.clone(),
            event_id: delivery.event_id,
            route_id: delivery.route_id,
            target_id: delivery.target_id,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            scope: delivery.scope,
            sent_at: None,
        });
        Ok(id)
    }

    async fn load_delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>, StorageError> {
        Ok(self.deliveries.read().await.iter().find(|d| &d.id == id).cloned())
    }

    async fn increment_delivery_attempt(&self, id: &DeliveryId, ceiling: u32) -> Result<Option<u32>, StorageError> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StorageError::Missing {
                entity: "delivery",
                id: id.to_string(),
            })?;
        if delivery.status == DeliveryStatus::Sent || delivery.attempts >= ceiling {
            return Ok(None);
        }
        delivery.attempts += 1;
        Ok(Some(delivery.attempts))
    }

    async fn update_delivery_status(
        &self,
        id: &DeliveryId,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StorageError::Missing {
                entity: "delivery",
                id: id.to_string(),
            })?;
        delivery.status = status;
        delivery.last_error = error;
        if status == DeliveryStatus::Sent {
            delivery.sent_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::types::{SourceKind, TargetKind};

    #[tokio::test]
    async fn inactive_sources_are_invisible_to_lookup() {
        let storage = InMemoryStorage::new();
        storage
            .insert_source(Source::new("s1", SourceKind::Generic, "k1", "u1").with_active(false))
            .await;
        storage.insert_source(Source::new("s2", SourceKind::Generic, "k2", "u1")).await;

        assert!(storage.find_active_source_by_key("k1").await.unwrap().is_none());
        assert!(storage.find_active_source_by_key("k2").await.unwrap().is_some());
        assert!(storage.find_active_source_by_key("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn route_lookup_filters_on_both_scopes() {
        let storage = InMemoryStorage::new();
        let team = Scope::team("t1");
        storage
            .insert_target(Target::new("t-ok", TargetKind::Slack, "http://ok").with_scope(team.clone()))
            .await;
        storage
            .insert_target(Target::new("t-other", TargetKind::Slack, "http://other").with_scope(Scope::team("t2")))
            .await;
        storage.insert_route(Route::new("r1", "s1", "t-ok").with_scope(team.clone())).await;
        storage.insert_route(Route::new("r2", "s1", "t-other").with_scope(team.clone())).await;
        storage.insert_route(Route::new("r3", "s1", "t-ok").with_scope(Scope::personal())).await;
        storage
            .insert_route(Route::new("r4", "s1", "t-ok").with_scope(team.clone()).with_active(false))
            .await;

        let routes = storage.find_active_routes(&SourceId::new("s1"), &team).await.unwrap();
        let ids: Vec<_> = routes.iter().map(|r| r.route_id.as_str()).collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[tokio::test]
    async fn delivery_rows_move_forward() {
        let storage = InMemoryStorage::new();
        let event_id = storage
            .create_event(NewEvent {
                source_id: SourceId::new("s1"),
                event_type: "push".to_string(),
                document: Document::text("hi"),
                scope: Scope::personal(),
                received_at: Utc::now(),
            })
            .await
            .unwrap();
        let id = storage
            .create_delivery(NewDelivery {
                event_id: event_id.clone(),
                route_id: RouteId::new("r1"),
                target_id: TargetId::new("t1"),
                scope: Scope::personal(),
            })
            .await
            .unwrap();

        assert_eq!(storage.increment_delivery_attempt(&id, 3).await.unwrap(), Some(1));
        assert_eq!(storage.increment_delivery_attempt(&id, 3).await.unwrap(), Some(2));
        storage.update_delivery_status(&id, DeliveryStatus::Sent, None).await.unwrap();
        assert_eq!(storage.increment_delivery_attempt(&id, 3).await.unwrap(), None);

        let row = storage.load_delivery(&id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert_eq!(row.status, DeliveryStatus::Sent);
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn attempts_never_pass_the_ceiling() {
        let storage = InMemoryStorage::new();
        let id = storage
            .create_delivery(NewDelivery {
                event_id: EventId::new("e1"),
                route_id: RouteId::new("r1"),
                target_id: TargetId::new("t1"),
                scope: Scope::personal(),
            })
            .await
            .unwrap();

        for expected in 1..=3 {
            assert_eq!(storage.increment_delivery_attempt(&id, 3).await.unwrap(), Some(expected));
        }
        assert_eq!(storage.increment_delivery_attempt(&id, 3).await.unwrap(), None);
        assert_eq!(storage.load_delivery(&id).await.unwrap().unwrap().attempts, 3);

        assert!(storage.increment_delivery_attempt(&DeliveryId::new("nope"), 3).await.is_err());
    }
}
