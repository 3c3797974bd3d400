use chrono::{DateTime, FixedOffset, Offset, Utc};

/// UTC+06:00.
pub const DEFAULT_OFFSET_SECS: i32 = 6 * 3600;

/// How snapshot labels and download filenames render a point in time.
///
/// Both read year-first, so they sort lexically by date and time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelFormat {
    pub offset: FixedOffset,
    pub zone_suffix: String,
    pub file_prefix: String,
}

impl Default for LabelFormat {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            zone_suffix: "BD".to_string(),
            file_prefix: "ronydb_backup".to_string(),
        }
    }
}

impl LabelFormat {
    /// `Backup created at 2024-03-05 + 09:07:01 BD`
    pub fn label(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        let mut out = format!("Backup created at {}", local.format("%Y-%m-%d + %H:%M:%S"));
        if !self.zone_suffix.is_empty() {
            out.push(' ');
            out.push_str(&self.zone_suffix);
        }
        out
    }

    /// `ronydb_backup_2024-03-05_09-07-01_BD.json`
    pub fn filename(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        let mut out = format!("{}_{}", self.file_prefix, local.format("%Y-%m-%d_%H-%M-%S"));
        if !self.zone_suffix.is_empty() {
            out.push('_');
            out.push_str(&self.zone_suffix);
        }
        out.push_str(".json");
        out
    }
}
