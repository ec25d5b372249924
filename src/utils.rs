use chrono::Local;

/// Timestamp used in default store names, `yyyymmdd_HH-MM-SS` form.
pub fn session_timestamp() -> String {
    Local::now().format("%Y%m%d_%H-%M-%S").to_string()
}

/// Default name for a new store directory.
pub fn timestamped_name(prefix: &str) -> String {
    format!("{}_{}", prefix, session_timestamp())
}
