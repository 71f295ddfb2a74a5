use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::{error::WeatherError, geo::Coordinate, model::CurrentConditions};

use super::WeatherProvider;

pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open-Meteo current-weather client. No API key required.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    base_url: String,
    http: Client,
}

impl OpenMeteoProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into(), http })
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_current(&self, coordinate: Coordinate) -> Result<CurrentConditions, WeatherError> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", coordinate.latitude.to_string()),
                ("longitude", coordinate.longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await
            .map_err(WeatherError::from_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(WeatherError::from_reqwest)?;

        if !status.is_success() {
            return Err(WeatherError::Network(format!(
                "Open-Meteo request failed with status {}: {}",
                status,
                truncate_body(&body),
            )));
        }

        parse_current(&body)
    }
}

#[derive(Debug, Deserialize)]
struct OmCurrentWeather {
    temperature: f64,
    weathercode: i64,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    current_weather: OmCurrentWeather,
}

/// Parse an Open-Meteo body. A float weather code, a missing field or any
/// other top-level shape is a decode failure.
fn parse_current(body: &str) -> Result<CurrentConditions, WeatherError> {
    let parsed: OmResponse = serde_json::from_str(body).map_err(|e| {
        WeatherError::Decode(format!(
            "unexpected Open-Meteo payload ({e}): {}",
            truncate_body(body)
        ))
    })?;

    Ok(CurrentConditions {
        temperature_celsius: parsed.current_weather.temperature,
        weather_code: parsed.current_weather.weathercode,
    })
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn current_conditions(
        &self,
        coordinate: Coordinate,
    ) -> Result<CurrentConditions, WeatherError> {
        self.fetch_current(coordinate).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
