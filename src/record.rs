//! The probe row and its round-trip verification.

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fmt;

/// Format of the `date` column, second precision to survive a DATETIME round trip.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns of the probe table, in verification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbeField {
    Hostname,
    Timestamp,
    SourceAddress,
    ApplicationName,
}

impl ProbeField {
    pub fn column(self) -> &'static str {
        match self {
            ProbeField::Hostname => "hostname",
            ProbeField::Timestamp => "date",
            ProbeField::SourceAddress => "src_ip_addr",
            ProbeField::ApplicationName => "app_name",
        }
    }
}

impl fmt::Display for ProbeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Which optional columns the probe table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSchema {
    pub source_address: bool,
    pub application_name: bool,
}

impl ProbeSchema {
    /// Columns written and read back, in verification order.
    pub fn fields(&self) -> Vec<ProbeField> {
        let mut fields = vec![ProbeField::Hostname, ProbeField::Timestamp];
        if self.source_address {
            fields.push(ProbeField::SourceAddress);
        }
        if self.application_name {
            fields.push(ProbeField::ApplicationName);
        }
        fields
    }
}

/// A row as returned by the read-back select: column name to nullable text.
pub type FetchedRow = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("probe row {0} not found on read-back")]
    RowNotFound(u64),
    #[error("missing field {0}")]
    MissingField(ProbeField),
    #[error("mismatch on {field}: expected \"{expected}\" got {}", display_actual(.actual))]
    Mismatch {
        field: ProbeField,
        expected: String,
        actual: Option<String>,
    },
}

fn display_actual(actual: &Option<String>) -> String {
    match actual {
        Some(value) => format!("\"{value}\""),
        None => "NULL".to_owned(),
    }
}

/// The single row a probe writes, reads back and deletes.
///
/// `insert_id` is `None` until the write succeeds and again after cleanup deletes the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub hostname: String,
    pub timestamp: String,
    pub source_address: Option<String>,
    pub application_name: Option<String>,
    pub insert_id: Option<u64>,
}

impl ProbeRecord {
    /// Capture hostname and timestamp once; optional fields are attached after validation.
    pub fn capture(hostname: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            timestamp: timestamp.into(),
            source_address: None,
            application_name: None,
            insert_id: None,
        }
    }

    pub fn value(&self, field: ProbeField) -> Option<&str> {
        match field {
            ProbeField::Hostname => Some(&self.hostname),
            ProbeField::Timestamp => Some(&self.timestamp),
            ProbeField::SourceAddress => self.source_address.as_deref(),
            ProbeField::ApplicationName => self.application_name.as_deref(),
        }
    }

    /// Compare a read-back row against this record.
    ///
    /// Every field is checked for presence before any value is compared, so a
    /// dropped column is reported as missing rather than as a mismatch.
    pub fn verify(&self, row: &FetchedRow, fields: &[ProbeField]) -> Result<(), IntegrityError> {
        if let Some(missing) = fields.iter().find(|f| !row.contains_key(f.column())) {
            return Err(IntegrityError::MissingField(*missing));
        }

        for &field in fields {
            let expected = self.value(field).unwrap_or_default();
            let actual = row.get(field.column()).and_then(|v| v.as_deref());
            if actual != Some(expected) {
                return Err(IntegrityError::Mismatch {
                    field,
                    expected: expected.to_owned(),
                    actual: actual.map(str::to_owned),
                });
            }
        }
        Ok(())
    }
}

/// Format the current time for the `date` column, in `tz` when configured, else local time.
pub fn capture_timestamp(tz: Option<Tz>) -> String {
    format_timestamp(Utc::now(), tz)
}

pub fn format_timestamp(now: DateTime<Utc>, tz: Option<Tz>) -> String {
    match tz {
        Some(tz) => now.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string(),
        None => now.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
    }
}
