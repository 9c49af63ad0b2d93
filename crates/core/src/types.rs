/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// 1-based position of an image within one run's fan-out.
pub type ImageIndex = u32;
