use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://pavan1234-001-site1.jtempurl.com/api/Panchang";
pub const DEFAULT_LATITUDE: f64 = 29.4516;
pub const DEFAULT_LONGITUDE: f64 = 79.1015;
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
pub const DEFAULT_STRATEGY: &str = "SuryaSiddhant";

/// Where and how the Panchang API should compute its values.
///
/// Sent unchanged with every request, whatever date the model asks about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA zone name the API reports local times in
    pub timezone: String,
    /// Named ephemeris strategy, e.g. `SuryaSiddhant`
    pub strategy: String,
}

impl Default for Observer {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            timezone: DEFAULT_TIMEZONE.to_string(),
            strategy: DEFAULT_STRATEGY.to_string(),
        }
    }
}

impl Observer {
    /// `"<latitude>, <longitude>"`, as reported back in tool results
    pub fn location(&self) -> String {
        format!("{}, {}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanchangConfig {
    pub base_url: String,
    pub observer: Observer,
}

impl Default for PanchangConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            observer: Observer::default(),
        }
    }
}

impl PanchangConfig {
    pub fn new<S: Into<String>>(base_url: S, observer: Observer) -> Self {
        Self {
            base_url: base_url.into(),
            observer,
        }
    }

    pub(crate) fn endpoint(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), resource)
    }
}
