//! Registry snapshot structures for diagnostics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::UserRole;

/// Read-only view of the registry for diagnostics and the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub total_connections: usize,
    pub by_role: HashMap<String, usize>,
    pub records: Vec<ConnectionInfo>,
}

/// One connection record in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub user_id: String,
    pub role: UserRole,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
