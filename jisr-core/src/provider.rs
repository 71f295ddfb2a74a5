use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    config::WeatherConfig,
    error::{ConfigurationError, WeatherError},
    geo::Coordinate,
    model::CurrentConditions,
    provider::openmeteo::OpenMeteoProvider,
};

pub mod openmeteo;

/// Source of current weather readings for a coordinate.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn current_conditions(
        &self,
        coordinate: Coordinate,
    ) -> Result<CurrentConditions, WeatherError>;
}

/// Construct the configured provider.
pub fn provider_from_config(
    config: &WeatherConfig,
) -> Result<Box<dyn WeatherProvider>, ConfigurationError> {
    config.validate()?;

    let provider = OpenMeteoProvider::with_timeout(
        config.base_url.clone(),
        Duration::from_secs(config.timeout_secs),
    )
    .map_err(|e| ConfigurationError::InvalidWeather(format!("could not build HTTP client: {e}")))?;

    Ok(Box::new(provider))
}
