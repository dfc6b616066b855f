use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REGION, DEFAULT_ZONE};
use crate::entity::{Entity, EntityBase, EntityType};
use crate::validation::{Rules, Validate};

/// Immutable descriptive snapshot of a worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadClient {
    #[serde(flatten)]
    pub base: EntityBase,
    pub version: String,
    pub region: String,
    pub zone: String,
    pub prometheus: bool,
    pub startup_args: String,
    pub start_time: DateTime<Utc>,
}

impl LoadClient {
    pub fn new(startup_args: impl Into<String>) -> Self {
        Self {
            base: EntityBase::new(EntityType::LoadClient),
            version: env!("CARGO_PKG_VERSION").to_string(),
            region: DEFAULT_REGION.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            prometheus: false,
            startup_args: startup_args.into(),
            start_time: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.base.id = id.into();
        self
    }

    pub fn with_location(mut self, region: impl Into<String>, zone: impl Into<String>) -> Self {
        self.region = region.into();
        self.zone = zone.into();
        self
    }
}

impl Entity for LoadClient {
    const ENTITY_TYPE: EntityType = EntityType::LoadClient;

    fn base(&self) -> &EntityBase {
        &self.base
    }
}

impl Validate for LoadClient {
    fn entity_type(&self) -> EntityType {
        EntityType::LoadClient
    }

    fn validation_errors(&self) -> Vec<String> {
        Rules::new()
            .required(&self.base.id, "Id")
            .required(&self.version, "Version")
            .required(&self.region, "Region")
            .required(&self.startup_args, "StartupArgs")
            .valid_date(&self.start_time, "StartTime")
            .finish()
    }
}
