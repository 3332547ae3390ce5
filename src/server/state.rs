use std::sync::Arc;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::notification::{MemoryPendingStore, NotificationDispatcher, PendingStore};
use crate::router::Router;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<Router>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub store: Arc<dyn PendingStore>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(Router::new(registry.clone()));
        let store: Arc<dyn PendingStore> =
            Arc::new(MemoryPendingStore::new(settings.queue.clone()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            router.clone(),
            store.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            router,
            dispatcher,
            store,
        }
    }
}
