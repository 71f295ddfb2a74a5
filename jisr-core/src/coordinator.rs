//! Wiring for presentation code.
//!
//! Build one [`StatusCoordinator`] at startup and hand it to every screen.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::{
    compose::{ActionMessageComposer, MapLinkBuilder, MessageUri},
    config::DeploymentConfig,
    error::{ComposeError, ConfigurationError},
    geo::Coordinate,
    model::{ActionIntent, ProximityState, WeatherStatus},
    proximity::{AuthorizationChange, LocationEvent, LocationPlatform, ProximityManager},
    provider::WeatherProvider,
    weather::{FetchOutcome, WeatherStatusManager},
};

#[derive(Debug, Clone)]
pub struct StatusCoordinator {
    config: Arc<DeploymentConfig>,
    weather: WeatherStatusManager,
    proximity: Arc<ProximityManager>,
    composer: Arc<ActionMessageComposer>,
    map: Arc<MapLinkBuilder>,
}

impl StatusCoordinator {
    pub fn new(
        config: Arc<DeploymentConfig>,
        weather: WeatherStatusManager,
        proximity: Arc<ProximityManager>,
        composer: Arc<ActionMessageComposer>,
        map: Arc<MapLinkBuilder>,
    ) -> Self {
        Self { config, weather, proximity, composer, map }
    }

    /// Validate `config` and build every component. Constructing the
    /// proximity manager issues the location permission prompt.
    pub fn from_config(
        config: DeploymentConfig,
        provider: Arc<dyn WeatherProvider>,
        platform: Arc<dyn LocationPlatform>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let composer = ActionMessageComposer::new(&config.messaging)?;
        let map = MapLinkBuilder::new(&config.map)?;

        let weather = WeatherStatusManager::new(provider, config.weather.in_flight);
        let proximity = ProximityManager::new(
            platform,
            config.target.coordinate(),
            config.proximity.clone(),
        );

        info!(target_name = %config.target.name, "status coordinator ready");

        Ok(Self::new(
            Arc::new(config),
            weather,
            Arc::new(proximity),
            Arc::new(composer),
            Arc::new(map),
        ))
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn target(&self) -> Coordinate {
        self.config.target.coordinate()
    }

    pub fn weather(&self) -> &WeatherStatusManager {
        &self.weather
    }

    pub fn proximity(&self) -> &Arc<ProximityManager> {
        &self.proximity
    }

    pub fn composer(&self) -> &ActionMessageComposer {
        &self.composer
    }

    pub fn weather_status(&self) -> watch::Receiver<WeatherStatus> {
        self.weather.status()
    }

    pub fn proximity_state(&self) -> watch::Receiver<ProximityState> {
        self.proximity.state()
    }

    pub fn subscribe_authorization(&self) -> broadcast::Receiver<AuthorizationChange> {
        self.proximity.subscribe_authorization()
    }

    /// Fetch weather for the point of interest.
    pub async fn refresh_weather(&self) -> FetchOutcome {
        self.weather.request_snapshot(self.target()).await
    }

    pub fn handle_location_event(&self, event: LocationEvent) {
        self.proximity.handle_event(event);
    }

    pub fn compose(&self, intent: &ActionIntent) -> Result<MessageUri, ComposeError> {
        self.composer.compose(intent)
    }

    pub fn map_link(&self) -> MessageUri {
        self.map.link(self.target())
    }

    pub fn shutdown(&self) {
        self.proximity.shutdown();
    }
}
