//! Crate-wide constants.

pub const APP_NAME: &str = "rangeforge";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "RANGEFORGE_DATA_DIR";

/// Embedded state database kept per build.
pub const BUILD_DB_FILENAME: &str = "build.db";

/// Connection descriptor a builder drops next to each provisioned host once it is reachable.
pub const CONN_DESCRIPTOR_FILENAME: &str = "conn.laforge";

/// How many times an edge whose endpoint is missing is retried after all nodes are known.
pub const MAX_DANGLING_EDGE_RETRIES: usize = 3;

/// Synthetic node every object hangs off until it gets a real parent.
pub const ROOT_NODE_ID: &str = "/";

/// Placeholder that commands may use for the host's identity file.
pub const IDENTITY_FILE_PLACEHOLDER: &str = "{{identity_file}}";
