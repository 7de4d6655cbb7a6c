//! Domain types shared across the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The student currently signed in at this kiosk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub student_id: String,
    pub email: String,
}

/// Enrollment row resolved by student email.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub email: String,
    pub student_id: String,
    pub photo_url: String,
}

/// A short-lived classroom check-in token.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceToken {
    pub token: String,
    pub class_session: String,
    pub expires_at: DateTime<Utc>,
}

/// Device class recorded with every attendance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceClass {
    Mobile,
    Desktop,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "Mobile",
            DeviceClass::Desktop => "Desktop",
        }
    }

    /// Storage round-trip; unknown strings read back as Desktop.
    pub fn from_db(value: &str) -> Self {
        match value {
            "Mobile" => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        }
    }
}

/// Browser family recorded with every attendance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BrowserFamily {
    Chrome,
    Safari,
    Firefox,
    #[serde(rename = "Internet Explorer")]
    InternetExplorer,
    Unknown,
}

impl BrowserFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "Chrome",
            BrowserFamily::Safari => "Safari",
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::InternetExplorer => "Internet Explorer",
            BrowserFamily::Unknown => "Unknown",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "Chrome" => BrowserFamily::Chrome,
            "Safari" => BrowserFamily::Safari,
            "Firefox" => BrowserFamily::Firefox,
            "Internet Explorer" => BrowserFamily::InternetExplorer,
            _ => BrowserFamily::Unknown,
        }
    }
}

/// Geolocation payload in the shape the ipapi-style endpoint returns.
/// Unknown fields in the response body are ignored; missing ones fail the
/// whole lookup, which degrades to "Unknown".
#[derive(Debug, Clone, Deserialize)]
pub struct GeoInfo {
    pub ip: String,
    pub city: String,
    pub region_code: String,
    pub country_name: String,
}

/// One immutable attendance row.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_email: String,
    pub class_session: String,
    pub recorded_at: DateTime<Utc>,
    pub location: String,
    pub ip: String,
    pub device: DeviceClass,
    pub browser: BrowserFamily,
    pub user_agent: String,
    /// The consumed token. UNIQUE in storage, which is what makes the row
    /// replay-proof.
    pub token: String,
}
