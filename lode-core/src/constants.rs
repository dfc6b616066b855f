//! Shared constants: status messages, cancellation markers and defaults

/// Seconds a client status record survives without a refreshing write
pub const CLIENT_STATUS_EXPIRATION_SECS: i64 = 60;

/// Region assigned to a load client when none is configured
pub const DEFAULT_REGION: &str = "Central";

/// Zone assigned to a load client when none is configured
pub const DEFAULT_ZONE: &str = "az-central-us";

pub const UNKNOWN: &str = "Unknown";

pub const INITIALIZING_CLIENT: &str = "Initializing LodeRunner client";
pub const CLIENT_READY: &str = "LodeRunner client is ready";
pub const RECEIVED_NEW_TEST_RUN: &str = "Received new TestRun";
pub const EXECUTING_TEST_RUN: &str = "Executing TestRun";
pub const TERMINATING_CLIENT: &str = "Terminating LodeRunner client";
pub const TERMINATION_REQUESTED: &str = "Termination requested via Cancellation Token.";

/// `ErrorMessage` of a LoadResult whose run was stopped by a HardStop request
pub const HARD_STOP_MARKER: &str = "HardStop requested: test run was stopped before completion";

/// `ErrorMessage` of a LoadResult whose run was interrupted by external cancellation
pub const CANCELLATION_MARKER: &str = "Operation cancelled: test run was interrupted by shutdown";

/// Earliest timestamp accepted by validation
pub const MIN_VALID_YEAR: i32 = 1990;
