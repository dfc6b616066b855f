use chrono::Utc;
use lode_core::constants::TERMINATION_REQUESTED;
use lode_core::{ClientStatus, ClientStatusType};

use super::EntityService;
use crate::error::StorageResult;

pub type ClientStatusService = EntityService<ClientStatus>;

impl EntityService<ClientStatus> {
    /// Mark a worker as terminating and persist it
    pub async fn terminate(&self, status: &mut ClientStatus) -> StorageResult<ClientStatus> {
        let now = Utc::now();
        status.set_status(ClientStatusType::Terminating, now)?;
        status.set_message(TERMINATION_REQUESTED, now);

        tracing::info!(
            client_id = %status.client_id(),
            status = %status.status,
            "{}",
            TERMINATION_REQUESTED
        );
        self.post(status).await
    }
}
