//! Lookup of registered services.

use super::{RegisteredService, Service};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ServicesManager: Send + Sync {
    /// The first registered service, by evaluation order, whose pattern
    /// matches `service`.
    async fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>>;
}

/// Services held in memory, kept sorted by evaluation order then id.
#[derive(Debug, Default)]
pub struct InMemoryServicesManager {
    services: RwLock<Vec<Arc<RegisteredService>>>,
}

impl InMemoryServicesManager {
    pub fn new(services: Vec<RegisteredService>) -> Self {
        let mut services: Vec<Arc<RegisteredService>> = services.into_iter().map(Arc::new).collect();
        sort(&mut services);
        Self {
            services: RwLock::new(services),
        }
    }

    /// Insert or replace (by id).
    pub async fn save(&self, service: RegisteredService) {
        let mut services = self.services.write().await;
        services.retain(|s| s.id != service.id);
        services.push(Arc::new(service));
        sort(&mut services);
    }

    pub async fn delete(&self, id: u64) -> bool {
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|s| s.id != id);
        services.len() != before
    }

    pub async fn all(&self) -> Vec<Arc<RegisteredService>> {
        self.services.read().await.clone()
    }
}

fn sort(services: &mut [Arc<RegisteredService>]) {
    services.sort_by(|a, b| {
        a.evaluation_order
            .cmp(&b.evaluation_order)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl ServicesManager for InMemoryServicesManager {
    async fn find_service_by(&self, service: &Service) -> Option<Arc<RegisteredService>> {
        self.services
            .read()
            .await
            .iter()
            .find(|registered| registered.matches(service))
            .cloned()
    }
}
