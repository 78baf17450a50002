use std::sync::Arc;

use crate::gateway::Gateway;
use crate::publisher::Publisher;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub publisher: Publisher,
}
