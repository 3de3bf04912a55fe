/**
 * How long (milliseconds) a scan session may run before it is stopped automatically.
 */
pub const SCAN_DEADLINE: u64 = 15_000;

/**
 * How long (milliseconds) establishing a connection to a peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 20_000;

/**
 * How long (milliseconds) discovering the services of a connected peripheral may take.
 */
pub const DISCOVER_SERVICES_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take.
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a disconnect may take.
 */
pub const DISCONNECT_DEADLINE: u64 = 5_000;

/**
 * How long (milliseconds) a released scan forwarding task may take to stop before it is aborted.
 */
pub const SCAN_RELEASE_DEADLINE: u64 = 1000;

/**
 * Capacity of the channels between the controller task and its collaborators.
 */
pub const CHANNEL_CAPACITY: usize = 64;

/**
 * Android API level starting from which the BLUETOOTH_SCAN / BLUETOOTH_CONNECT runtime
 * permissions exist.
 */
pub const ANDROID_BLUETOOTH_PERMISSIONS_API_LEVEL: u32 = 31;
