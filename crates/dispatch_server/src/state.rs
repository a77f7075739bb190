use std::sync::Arc;

use dispatch_core::service::DispatchService;

use crate::auth::JwtAuth;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DispatchService>,
    pub auth: Arc<JwtAuth>,
}

impl AppState {
    pub fn new(service: Arc<DispatchService>, auth: JwtAuth) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
        }
    }
}
