//! Shared constants for the feed, store, and layer boundaries.

/// Hard ceiling on operations per atomic store batch.
pub const MAX_BATCH_SIZE: usize = 500;

/// Collection that holds one document per tracked aircraft.
pub const DEFAULT_COLLECTION: &str = "aircraft";

/// OpenSky "all states" endpoint, queried with a bounding box.
pub const DEFAULT_FEED_ENDPOINT: &str = "https://opensky-network.org/api/states/all";

/// Default bounding box (degrees) covering western Canada and the northern plains.
pub const DEFAULT_LAMIN: f64 = 47.7836;
pub const DEFAULT_LAMAX: f64 = 57.0646;
pub const DEFAULT_LOMIN: f64 = -129.8144;
pub const DEFAULT_LOMAX: f64 = -92.9443;

/// Anonymous OpenSky clients are limited to one state query every 10 seconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_COMMIT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

/// Number of positional columns in one feed state vector.
pub const FEED_RECORD_WIDTH: usize = 17;

/// Rotation added to the feed heading before it reaches the renderer.
/// The aircraft model faces tail-first at rotation 0.
pub const HEADING_ROTATION_OFFSET_DEG: f32 = 180.0;

/// Attribute used as the feature key inside the visual layer.
pub const OBJECT_ID_FIELD: &str = "ObjectID";
