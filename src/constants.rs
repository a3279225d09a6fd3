use rand::Rng;

/// Name under which the background location task is registered with the scheduler
pub const LOCATION_TASK_NAME: &str = "background-location-task";

/// Store keys
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_DEVICE_NAME: &str = "device_name";
pub const KEY_DEVICE_MODE: &str = "device_mode";
pub const KEY_PARENT_DEVICE_ID: &str = "parent_device_id";

/// Minimum seconds between background firings
pub const DEFAULT_TRACKING_INTERVAL_SECS: u64 = 60;

/// Minimum meters moved between background firings
pub const DEFAULT_TRACKING_DISTANCE_METERS: f64 = 50.0;

/// Cap on the media snapshot size
pub const DEFAULT_MEDIA_LIMIT: usize = 1000;

/// Default number of history samples fetched for a child
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Placeholder for contacts without a display name
pub const UNKNOWN_CONTACT_NAME: &str = "Unknown";

/// Length of the pairing code shown to the user
pub const PAIRING_CODE_LEN: usize = 6;

/// Generate a new device identifier
/// Format: device_{unix_seconds}_{9 random lowercase alphanumerics}
/// The time component keeps a reinstall on the same device from reusing an old id
pub fn generate_device_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("device_{}_{}", chrono::Utc::now().timestamp(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_device_id_format() {
        let id = generate_device_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "device");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_generate_device_id_unique() {
        let a = generate_device_id();
        let b = generate_device_id();
        assert_ne!(a, b);
    }
}
