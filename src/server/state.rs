use std::sync::Arc;
use std::time::Instant;

use crate::auth::TokenValidator;
use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::relay::Broadcaster;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub token_validator: Arc<TokenValidator>,
    pub connection_manager: Arc<ConnectionManager>,
    pub broadcaster: Arc<Broadcaster>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let token_validator = Arc::new(TokenValidator::new(&settings.auth));
        let connection_manager = Arc::new(ConnectionManager::new());
        let broadcaster = Arc::new(Broadcaster::new(
            connection_manager.clone(),
            &settings.relay,
        ));

        Self {
            settings: Arc::new(settings),
            token_validator,
            connection_manager,
            broadcaster,
            start_time: Instant::now(),
        }
    }
}
