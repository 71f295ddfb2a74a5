use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::error::{ComposeError, ProximityError};
use crate::geo::Coordinate;

/// WMO codes above this are fog, drizzle, rain, snow or storms.
pub const FOG_OR_RAIN_CODE_ABOVE: i64 = 50;
/// Temperatures below this (°C) are cold.
pub const COLD_BELOW_CELSIUS: f64 = 15.0;
/// Temperatures above this (°C) are hot and sunny.
pub const HOT_ABOVE_CELSIUS: f64 = 25.0;

/// Raw reading returned by a weather provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_celsius: f64,
    pub weather_code: i64,
}

/// Coarse weather condition shown next to the point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Clear,
    Mild,
    Cold,
    FoggyOrRainy,
}

impl Condition {
    /// Classify a reading. The first matching rule wins:
    /// weather code, then cold, then hot, then mild.
    ///
    /// A NaN temperature matches none of the temperature rules and is `Mild`.
    pub fn classify(temperature_celsius: f64, weather_code: i64) -> Self {
        if weather_code > FOG_OR_RAIN_CODE_ABOVE {
            Self::FoggyOrRainy
        } else if temperature_celsius < COLD_BELOW_CELSIUS {
            Self::Cold
        } else if temperature_celsius > HOT_ABOVE_CELSIUS {
            Self::Clear
        } else {
            Self::Mild
        }
    }

    pub fn icon_token(&self) -> &'static str {
        match self {
            Self::FoggyOrRainy => "fog",
            Self::Cold => "snowflake",
            Self::Clear => "sun",
            Self::Mild => "cloud",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Hot and sunny",
            Self::Mild => "Mild",
            Self::Cold => "Cold",
            Self::FoggyOrRainy => "Foggy or rainy",
        }
    }
}

/// One complete weather reading. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub temperature_celsius: f64,
    pub weather_code: i64,
    pub condition: Condition,
    pub icon_token: &'static str,
}

impl WeatherSnapshot {
    pub fn from_conditions(conditions: CurrentConditions) -> Self {
        let condition = Condition::classify(conditions.temperature_celsius, conditions.weather_code);
        Self {
            temperature_celsius: conditions.temperature_celsius,
            weather_code: conditions.weather_code,
            condition,
            icon_token: condition.icon_token(),
        }
    }
}

/// What the weather manager publishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherStatus {
    pub snapshot: Option<WeatherSnapshot>,
    pub loading: bool,
    pub last_error: Option<String>,
}

/// The one thing to show for a [`WeatherStatus`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeatherDisplay<'a> {
    Snapshot(&'a WeatherSnapshot),
    Loading,
    Error(&'a str),
    Empty,
}

impl WeatherStatus {
    /// Snapshot beats loading beats error: stale data is preferred over a spinner.
    pub fn display(&self) -> WeatherDisplay<'_> {
        if let Some(snapshot) = &self.snapshot {
            WeatherDisplay::Snapshot(snapshot)
        } else if self.loading {
            WeatherDisplay::Loading
        } else if let Some(error) = &self.last_error {
            WeatherDisplay::Error(error)
        } else {
            WeatherDisplay::Empty
        }
    }
}

/// Location authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    Unrequested,
    Requested,
    Granted,
    Denied,
}

impl Authorization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Authorization::Unrequested => "unrequested",
            Authorization::Requested => "requested",
            Authorization::Granted => "granted",
            Authorization::Denied => "denied",
        }
    }
}

impl std::fmt::Display for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user position together with its distance to the target.
/// Both are set together or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub distance_km: f64,
}

/// What the proximity manager publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityState {
    pub authorization: Authorization,
    pub position: Option<PositionFix>,
    pub target: Coordinate,
    pub display_text: String,
    pub last_error: Option<ProximityError>,
}

impl ProximityState {
    pub fn new(target: Coordinate, display_text: impl Into<String>) -> Self {
        Self {
            authorization: Authorization::Unrequested,
            position: None,
            target,
            display_text: display_text.into(),
            last_error: None,
        }
    }

    pub fn user_coordinate(&self) -> Option<Coordinate> {
        self.position.map(|p| p.coordinate)
    }

    pub fn distance_km(&self) -> Option<f64> {
        self.position.map(|p| p.distance_km)
    }
}

/// The kinds of action a user can send to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Booking,
    Order,
    ServiceRequest,
    LostAndFound,
    Custom,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Booking => "booking",
            IntentKind::Order => "order",
            IntentKind::ServiceRequest => "service_request",
            IntentKind::LostAndFound => "lost_and_found",
            IntentKind::Custom => "custom",
        }
    }

    pub const fn all() -> &'static [IntentKind] {
        &[
            IntentKind::Booking,
            IntentKind::Order,
            IntentKind::ServiceRequest,
            IntentKind::LostAndFound,
            IntentKind::Custom,
        ]
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for IntentKind {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.to_lowercase().replace('-', "_");

        match normalized.as_str() {
            "booking" => Ok(IntentKind::Booking),
            "order" => Ok(IntentKind::Order),
            "service_request" => Ok(IntentKind::ServiceRequest),
            "lost_and_found" => Ok(IntentKind::LostAndFound),
            "custom" => Ok(IntentKind::Custom),
            _ => Err(anyhow::anyhow!(
                "Unknown intent kind '{value}'. Supported kinds: booking, order, service-request, lost-and-found, custom."
            )),
        }
    }
}

/// A user's requested action before it is rendered into a message.
/// Built, composed once, and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionIntent {
    pub kind: IntentKind,
    pub fields: BTreeMap<String, String>,
}

impl ActionIntent {
    pub fn new(kind: IntentKind) -> Self {
        Self { kind, fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn booking(
        name: impl Into<String>,
        party_size: impl Into<String>,
        timestamp_iso: impl Into<String>,
    ) -> Self {
        Self::new(IntentKind::Booking)
            .with_field("name", name)
            .with_field("partySize", party_size)
            .with_field("timestampISO", timestamp_iso)
    }

    /// Build an intent from raw byte fields, e.g. text handed over by a
    /// platform input method. Values must be valid UTF-8.
    pub fn from_raw_fields<K, V>(
        kind: IntentKind,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, ComposeError>
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let mut intent = Self::new(kind);
        for (key, value) in fields {
            let key = key.into();
            match String::from_utf8(value.into()) {
                Ok(text) => {
                    intent.fields.insert(key, text);
                }
                Err(_) => return Err(ComposeError::Encoding { field: key }),
            }
        }
        Ok(intent)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_and_clear() {
        let snapshot = WeatherSnapshot::from_conditions(CurrentConditions {
            temperature_celsius: 30.0,
            weather_code: 0,
        });
        assert_eq!(snapshot.condition, Condition::Clear);
        assert_eq!(snapshot.icon_token, "sun");
    }

    #[test]
    fn weather_code_rule_beats_cold_rule() {
        assert_eq!(Condition::classify(10.0, 80), Condition::FoggyOrRainy);
        assert_eq!(Condition::classify(10.0, 60), Condition::FoggyOrRainy);
        assert_eq!(Condition::classify(10.0, 60).icon_token(), "fog");
    }

    #[test]
    fn weather_code_boundary_is_exclusive() {
        assert_eq!(Condition::classify(20.0, 50), Condition::Mild);
        assert_eq!(Condition::classify(20.0, 51), Condition::FoggyOrRainy);
    }

    #[test]
    fn temperature_boundaries() {
        assert_eq!(Condition::classify(14.9, 0), Condition::Cold);
        assert_eq!(Condition::classify(15.0, 0), Condition::Mild);
        assert_eq!(Condition::classify(25.0, 0), Condition::Mild);
        assert_eq!(Condition::classify(25.1, 0), Condition::Clear);
        assert_eq!(Condition::classify(-40.0, 3).icon_token(), "snowflake");
        assert_eq!(Condition::classify(20.0, 3).icon_token(), "cloud");
    }

    #[test]
    fn classify_is_total() {
        assert_eq!(Condition::classify(f64::NAN, 0), Condition::Mild);
        assert_eq!(Condition::classify(f64::INFINITY, 0), Condition::Clear);
        assert_eq!(Condition::classify(f64::NEG_INFINITY, i64::MIN), Condition::Cold);
        assert_eq!(Condition::classify(f64::NAN, i64::MAX), Condition::FoggyOrRainy);
    }

    #[test]
    fn display_prefers_snapshot_then_loading_then_error() {
        let snapshot = WeatherSnapshot::from_conditions(CurrentConditions {
            temperature_celsius: 20.0,
            weather_code: 1,
        });
        let mut status = WeatherStatus {
            snapshot: Some(snapshot.clone()),
            loading: true,
            last_error: Some("boom".into()),
        };
        assert_eq!(status.display(), WeatherDisplay::Snapshot(&snapshot));

        status.snapshot = None;
        assert_eq!(status.display(), WeatherDisplay::Loading);

        status.loading = false;
        assert_eq!(status.display(), WeatherDisplay::Error("boom"));

        status.last_error = None;
        assert_eq!(status.display(), WeatherDisplay::Empty);
    }

    #[test]
    fn intent_kind_as_str_roundtrip() {
        for kind in IntentKind::all() {
            let parsed = IntentKind::try_from(kind.as_str()).expect("roundtrip should succeed");
            assert_eq!(*kind, parsed);
        }
        assert_eq!(
            IntentKind::try_from("Lost-And-Found").expect("dashes are accepted"),
            IntentKind::LostAndFound
        );
    }

    #[test]
    fn unknown_intent_kind_error() {
        let err = IntentKind::try_from("refund").unwrap_err();
        assert!(err.to_string().contains("Unknown intent kind"));
    }

    #[test]
    fn raw_fields_must_be_utf8() {
        let ok = ActionIntent::from_raw_fields(IntentKind::Custom, [("freeText", "hi".as_bytes())])
            .expect("valid utf-8");
        assert_eq!(ok.field("freeText"), Some("hi"));

        let err = ActionIntent::from_raw_fields(
            IntentKind::Custom,
            [("freeText", vec![0xff_u8, 0xfe])],
        )
        .unwrap_err();
        assert_eq!(err, ComposeError::Encoding { field: "freeText".into() });
    }

    #[test]
    fn position_keeps_coordinate_and_distance_together() {
        let mut state = ProximityState::new(Coordinate::new(21.0, 40.0), "Locating…");
        assert_eq!(state.user_coordinate(), None);
        assert_eq!(state.distance_km(), None);

        state.position = Some(PositionFix {
            coordinate: Coordinate::new(21.01, 40.0),
            distance_km: 1.1,
        });
        assert_eq!(state.user_coordinate(), Some(Coordinate::new(21.01, 40.0)));
        assert_eq!(state.distance_km(), Some(1.1));
    }
}
