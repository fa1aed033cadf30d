//! Client configuration constants.
//!
//! Centralizes hardcoded values; most are overridable through [`ClientConfig`](crate::ClientConfig).

/// Collection holding todo documents.
pub const DEFAULT_COLLECTION: &str = "todos";

/// Field the subscription orders by (descending).
pub const ORDER_KEY: &str = "createdAt";

/// Capacity of the presentation event broadcast. A receiver that falls this
/// far behind lags and must resync from `SyncHandle::items()`.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory under the platform config dir.
pub const CONFIG_DIR: &str = "agenda";

/// Config file name within [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "client.ron";
