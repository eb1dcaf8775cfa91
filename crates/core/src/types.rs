/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Privacy setting applied to every upload.
pub const PRIVACY_PRIVATE: &str = "private";
