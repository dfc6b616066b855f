use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::CLIENT_STATUS_EXPIRATION_SECS;
use crate::entity::{ClientStatusType, Entity, EntityBase, EntityType};
use crate::error::{CoreError, Result};
use crate::models::LoadClient;
use crate::validation::{Rules, Validate};

/// Persisted liveness record of one worker process
///
/// `last_updated` moves on every mutation; `last_status_change` moves only
/// when `status` takes a different value, so `last_status_change <=
/// last_updated` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    #[serde(flatten)]
    pub base: EntityBase,
    pub last_updated: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
    /// Seconds spent in the current status as of `last_updated`
    pub status_duration: i64,
    pub status: ClientStatusType,
    pub message: String,
    pub load_client: LoadClient,
    /// Seconds of inactivity before the store drops this record
    pub ttl: i64,
}

impl ClientStatus {
    pub fn new(load_client: LoadClient) -> Self {
        let now = Utc::now();
        Self {
            base: EntityBase::new(EntityType::ClientStatus),
            last_updated: now,
            last_status_change: now,
            status_duration: 0,
            status: ClientStatusType::Starting,
            message: String::new(),
            load_client,
            ttl: CLIENT_STATUS_EXPIRATION_SECS,
        }
    }

    /// Move to `status`, returning whether the enum value changed
    pub fn set_status(&mut self, status: ClientStatusType, now: DateTime<Utc>) -> Result<bool> {
        if !self.status.can_transition_to(status) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        let changed = self.status != status;
        self.touch(now);
        if changed {
            self.status = status;
            self.last_status_change = self.last_updated;
            self.status_duration = 0;
        }
        Ok(changed)
    }

    pub fn set_message(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.message = message.into();
        self.touch(now);
    }

    /// Refresh `last_updated` without changing anything else
    ///
    /// A clock stepping backwards never moves the timestamp back.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now.max(self.last_updated);
        self.status_duration = (self.last_updated - self.last_status_change).num_seconds();
    }

    pub fn client_id(&self) -> &str {
        &self.load_client.base.id
    }
}

impl Entity for ClientStatus {
    const ENTITY_TYPE: EntityType = EntityType::ClientStatus;

    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn ttl(&self) -> Option<i64> {
        Some(self.ttl)
    }
}

impl Validate for ClientStatus {
    fn entity_type(&self) -> EntityType {
        EntityType::ClientStatus
    }

    fn validation_errors(&self) -> Vec<String> {
        Rules::new()
            .required(&self.base.id, "Id")
            .required(&self.base.partition_key, "PartitionKey")
            .valid_date(&self.last_updated, "LastUpdated")
            .check(self.status_duration >= 0, "StatusDuration", "must not be negative")
            .check(self.ttl > 0, "Ttl", "must be greater than 0")
            .nested("LoadClient", self.load_client.validation_errors())
            .finish()
    }
}
