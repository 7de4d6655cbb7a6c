//! Client provenance: device class, browser family and best-effort
//! geolocation.
//!
//! Classification is substring-based on the raw user agent string, matching
//! what the attendance reports have always contained. The rules are frozen;
//! rows written years apart must stay comparable.

use crate::ports::GeoLookup;
use crate::types::{BrowserFamily, DeviceClass, GeoInfo};
use std::time::Duration;

/// Markers checked case-insensitively against the user agent.
const MOBILE_MARKERS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Anything without a mobile marker counts as Desktop.
pub fn device_class(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_lowercase();
    if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

/// Ordered, case-sensitive substring checks; the first hit wins.
///
/// The order is the contract: every Chrome user agent also contains
/// "Safari", so Chrome must be probed first.
pub fn browser_family(user_agent: &str) -> BrowserFamily {
    if user_agent.contains("Chrome") {
        BrowserFamily::Chrome
    } else if user_agent.contains("Safari") {
        BrowserFamily::Safari
    } else if user_agent.contains("Firefox") {
        BrowserFamily::Firefox
    } else if user_agent.contains("MSIE") || user_agent.contains("Trident/") {
        BrowserFamily::InternetExplorer
    } else {
        BrowserFamily::Unknown
    }
}

/// The location string stored on attendance rows.
pub fn format_location(geo: &GeoInfo) -> String {
    format!(
        "{}, {} - {}",
        geo.city, geo.region_code, geo.country_name
    )
}

/// ipapi-style geolocation client. Every failure mode, including timeout,
/// degrades to `None`.
pub struct IpApiClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl IpApiClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }
}

impl GeoLookup for IpApiClient {
    async fn lookup(&self) -> Option<GeoInfo> {
        let request = async {
            let response = self.client.get(&self.url).send().await.ok()?;
            let response = response.error_for_status().ok()?;
            response.json::<GeoInfo>().await.ok()
        };
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Some(geo)) => Some(geo),
            Ok(None) => {
                tracing::debug!(url = %self.url, "geolocation lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!(url = %self.url, "geolocation lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANDROID_CHROME: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/119.0.0.0 Mobile Safari/537.36";
    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) \
                                 AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 \
                                 Mobile/15E148 Safari/604.1";
    const LINUX_FIREFOX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";
    const IE11: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64; Trident/7.0; rv:11.0) like Gecko";
    const IE10: &str = "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.1; Trident/6.0)";
    const OPERA_MINI: &str = "Opera/9.80 (J2ME/MIDP; Opera Mini/9.80.1/28.2555; U; en) Presto/2.10";

    #[test]
    fn mobile_markers_match_case_insensitively() {
        assert_eq!(device_class(ANDROID_CHROME), DeviceClass::Mobile);
        assert_eq!(device_class(IPHONE_SAFARI), DeviceClass::Mobile);
        assert_eq!(device_class("SOMETHING IPHONE SOMETHING"), DeviceClass::Mobile);
        assert_eq!(device_class(OPERA_MINI), DeviceClass::Mobile);
    }

    #[test]
    fn desktop_is_the_fallback_class() {
        assert_eq!(device_class(LINUX_FIREFOX), DeviceClass::Desktop);
        assert_eq!(device_class(IE11), DeviceClass::Desktop);
        assert_eq!(device_class(""), DeviceClass::Desktop);
    }

    #[test]
    fn chrome_wins_over_its_embedded_safari_marker() {
        // Chrome UAs carry "Safari/537.36"; order decides.
        assert_eq!(browser_family(ANDROID_CHROME), BrowserFamily::Chrome);
    }

    #[test]
    fn browser_families() {
        assert_eq!(browser_family(IPHONE_SAFARI), BrowserFamily::Safari);
        assert_eq!(browser_family(LINUX_FIREFOX), BrowserFamily::Firefox);
        assert_eq!(browser_family(IE11), BrowserFamily::InternetExplorer);
        assert_eq!(browser_family(IE10), BrowserFamily::InternetExplorer);
        assert_eq!(browser_family(OPERA_MINI), BrowserFamily::Unknown);
        assert_eq!(browser_family(""), BrowserFamily::Unknown);
    }

    #[test]
    fn browser_checks_are_case_sensitive() {
        assert_eq!(browser_family("chrome without capitals"), BrowserFamily::Unknown);
    }

    #[test]
    fn location_format_is_city_region_country() {
        let geo = GeoInfo {
            ip: "203.0.113.9".into(),
            city: "Campinas".into(),
            region_code: "SP".into(),
            country_name: "Brazil".into(),
        };
        assert_eq!(format_location(&geo), "Campinas, SP - Brazil");
    }
}
