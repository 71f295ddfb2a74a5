use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::ConfigurationError,
    geo::Coordinate,
    model::IntentKind,
    proximity::UpdateMode,
    provider::openmeteo::OPEN_METEO_FORECAST_URL,
    weather::InFlightPolicy,
};

/// The point of interest everything is measured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: "Al Lawziyah Bridge, Al-Shafa".to_string(),
            latitude: 21.0722,
            longitude: 40.353,
        }
    }
}

impl TargetConfig {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Arrival threshold, position update policy and the fixed display strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub arrival_threshold_km: f64,
    pub update_mode: UpdateMode,
    pub arrived_message: String,
    pub unavailable_message: String,
    pub error_message: String,
    pub pending_message: String,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            arrival_threshold_km: 0.5,
            update_mode: UpdateMode::Continuous,
            arrived_message: "You have arrived".to_string(),
            unavailable_message: "Location unavailable".to_string(),
            error_message: "Location error".to_string(),
            pending_message: "Locating…".to_string(),
        }
    }
}

impl ProximityConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.arrival_threshold_km.is_finite() || self.arrival_threshold_km <= 0.0 {
            return Err(ConfigurationError::InvalidThreshold(
                self.arrival_threshold_km.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub in_flight: InFlightPolicy,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: OPEN_METEO_FORECAST_URL.to_string(),
            timeout_secs: 10,
            in_flight: InFlightPolicy::Coalesce,
        }
    }
}

impl WeatherConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        url::Url::parse(&self.base_url).map_err(|e| {
            ConfigurationError::InvalidWeather(format!("base_url '{}': {e}", self.base_url))
        })?;
        if self.timeout_secs == 0 {
            return Err(ConfigurationError::InvalidWeather(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message templates, one per intent kind.
///
/// Placeholders are `{fieldName}`; `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub booking: String,
    pub order: String,
    pub service_request: String,
    pub lost_and_found: String,
    pub custom: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            booking: "New booking request\nName: {name}\nParty size: {partySize}\nTime: {timestampISO}"
                .to_string(),
            order: "New order\nName: {name}\nItem: {itemName}".to_string(),
            service_request: "Service request\nName: {name}\nRequest: {freeText}".to_string(),
            lost_and_found: "Lost item report\nName: {name}\nItem: {itemName}\nDetails: {freeText}"
                .to_string(),
            custom: "{freeText}".to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn get(&self, kind: IntentKind) -> &str {
        match kind {
            IntentKind::Booking => &self.booking,
            IntentKind::Order => &self.order,
            IntentKind::ServiceRequest => &self.service_request,
            IntentKind::LostAndFound => &self.lost_and_found,
            IntentKind::Custom => &self.custom,
        }
    }
}

/// Outbound messaging channel: who receives intents and how the link is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Digits with an optional leading `+`. Required.
    pub recipient_phone: Option<String>,

    /// Must contain `{phone}` and `{text}` once each, e.g.
    /// `whatsapp://{phone}?text={text}`.
    pub uri_template: String,

    /// chrono strftime format for the `timestampISO` field.
    pub timestamp_format: String,

    pub templates: MessageTemplates,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            recipient_phone: None,
            uri_template: "whatsapp://{phone}?text={text}".to_string(),
            timestamp_format: "%A %d %B %Y, %H:%M".to_string(),
            templates: MessageTemplates::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Must contain `{query}`, which receives `"<lat>,<lon>"` percent-encoded.
    pub uri_template: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { uri_template: "maps://?q={query}".to_string() }
    }
}

/// Deployment configuration, read once at startup.
///
/// Example TOML:
/// ```toml
/// [target]
/// latitude = 21.0722
/// longitude = 40.353
///
/// [messaging]
/// recipient_phone = "966500000000"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeploymentConfig {
    pub target: TargetConfig,
    pub proximity: ProximityConfig,
    pub weather: WeatherConfig,
    pub messaging: MessagingConfig,
    pub map: MapConfig,
}

impl DeploymentConfig {
    /// Load config from the platform config dir, or return the defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file.
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: DeploymentConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the platform config dir, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("sa", "jisr", "jisr")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Checks the parts every component needs. Messaging templates are
    /// checked in full when the composer is built.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        Coordinate::try_new(self.target.latitude, self.target.longitude)?;
        self.proximity.validate()?;
        self.weather.validate()?;
        Ok(())
    }

    pub fn set_target(&mut self, coordinate: Coordinate) {
        self.target.latitude = coordinate.latitude;
        self.target.longitude = coordinate.longitude;
    }

    pub fn set_recipient_phone(&mut self, phone: impl Into<String>) {
        self.messaging.recipient_phone = Some(phone.into());
    }
}
