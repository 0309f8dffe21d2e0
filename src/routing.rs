use std::sync::Arc;

use crate::error::StorageError;
use crate::storage::Storage;
use crate::types::{RouteDescriptor, Scope, Source};

/// Route, source and target scopes must pairwise agree.
pub fn scopes_agree(source: &Scope, route: &Scope, target: &Scope) -> bool {
    source.matches(route) && source.matches(target) && route.matches(target)
}

/// Finds the active routes a source's events fan out to.
///
/// Scope agreement is enforced here on every lookup, whatever the storage
/// backend already filtered.
pub struct RouteResolver {
    storage: Arc<dyn Storage>,
}

impl RouteResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn resolve(&self, source: &Source) -> Result<Vec<RouteDescriptor>, StorageError> {
        let candidates = self.storage.find_active_routes(&source.id, &source.scope).await?;
        let total = candidates.len();

        let routes: Vec<RouteDescriptor> = candidates
            .into_iter()
            .filter(|route| {
                let agree = scopes_agree(&source.scope, &route.route_scope, &route.target_scope);
                if !agree {
                    tracing::warn!(
                        source_id = %source.id,
                        route_id = %route.route_id,
                        "route scope disagrees with source, skipping"
                    );
                }
                agree
            })
            .collect();

        tracing::debug!(source_id = %source.id, candidates = total, routes = routes.len(), "routes resolved");
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Delivery, DeliveryId, DeliveryStatus, Event, EventId, NewDelivery, NewEvent, RouteId, SourceId,
        SourceKind, TargetId, TargetKind,
    };
    use async_trait::async_trait;

    /// Storage whose route query ignores scope entirely.
    struct LooseStorage(Vec<RouteDescriptor>);

    #[async_trait]
    impl Storage for LooseStorage {
        async fn find_active_source_by_key(&self, _key: &str) -> Result<Option<Source>, StorageError> {
            Ok(None)
        }
        async fn find_source(&self, _id: &SourceId) -> Result<Option<Source>, StorageError> {
            Ok(None)
        }
        async fn find_active_routes(
            &self,
            _source_id: &SourceId,
            _scope: &Scope,
        ) -> Result<Vec<RouteDescriptor>, StorageError> {
            Ok(self.0.clone())
        }
        async fn load_route(&self, _id: &RouteId) -> Result<Option<RouteDescriptor>, StorageError> {
            Ok(None)
        }
        async fn create_event(&self, _event: NewEvent) -> Result<EventId, StorageError> {
            Err(StorageError::Backend("read only".into()))
        }
        async fn mark_event_processed(&self, _id: &EventId) -> Result<(), StorageError> {
            Ok(())
        }
        async fn load_event(&self, _id: &EventId) -> Result<Option<Event>, StorageError> {
            Ok(None)
        }
        async fn create_delivery(
            &self,
            _delivery: NewDelivery,
        ) -> Result<DeliveryId, StorageError> {
            Err(StorageError::Backend("read only".into()))
        }
        async fn load_delivery(
            &self,
            _id: &DeliveryId,
        ) -> Result<Option<Delivery>, StorageError> {
            Ok(None)
        }
        async fn increment_delivery_attempt(
            &self,
            _id: &DeliveryId,
            _ceiling: u32,
        ) -> Result<Option<u32>, StorageError> {
            Ok(None)
        }
        async fn update_delivery_status(
            &self,
            _id: &DeliveryId,
            _status: DeliveryStatus,
            _error: Option<String>,
        ) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn descriptor(id: &str, route_scope: Scope, target_scope: Scope) -> RouteDescriptor {
        RouteDescriptor {
            route_id: RouteId::new(id),
            target_id: TargetId::new("t"),
            target_kind: TargetKind::Slack,
            target_url: "http://chat.example".to_string(),
            message_template: None,
            route_scope,
            target_scope,
        }
    }

    #[tokio::test]
    async fn mismatched_scopes_never_route() {
        let storage = Arc::new(LooseStorage(vec![
            descriptor("same", Scope::team("a"), Scope::team("a")),
            descriptor("other-team-target", Scope::team("a"), Scope::team("b")),
            descriptor("personal-route", Scope::personal(), Scope::team("a")),
        ]));
        let source = Source::new("s", SourceKind::Generic, "k", "u").with_scope(Scope::team("a"));

        let routes = RouteResolver::new(storage).resolve(&source).await.unwrap();
        let ids: Vec<_> = routes.iter().map(|r| r.route_id.as_str()).collect();
        assert_eq!(ids, vec!["same"]);
    }

    #[test]
    fn scope_agreement_is_pairwise() {
        let a = Scope::team("a");
        assert!(scopes_agree(&a, &a, &a));
        assert!(!scopes_agree(&a, &a, &Scope::personal()));
        assert!(scopes_agree(&Scope::personal(), &Scope::personal(), &Scope::personal()));
    }
}
