use mongodb::Database;
use std::sync::Arc;

use crate::services::duitku_service::DuitkuService;
use crate::services::reconcile_service::ReconcileService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub duitku: Arc<DuitkuService>,
    pub reconcile: Arc<ReconcileService>,
}
