//! Core library for the `jisr` status engine.
//!
//! This crate defines:
//! - Deployment configuration
//! - Weather fetching and classification for the point of interest
//! - Location permission tracking and live distance to it
//! - Composition of outbound messaging and map deep links
//!
//! It has no UI. Presentation code builds a [`StatusCoordinator`] once and
//! reads the state it publishes.

pub mod compose;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod geo;
pub mod model;
pub mod provider;
pub mod proximity;
pub mod weather;

pub use compose::{ActionMessageComposer, MapLinkBuilder, MessageUri};
pub use config::DeploymentConfig;
pub use coordinator::StatusCoordinator;
pub use error::{ComposeError, ConfigurationError, ProximityError, WeatherError};
pub use geo::{Coordinate, haversine_km};
pub use model::{
    ActionIntent, Authorization, Condition, IntentKind, ProximityState, WeatherSnapshot,
    WeatherStatus,
};
pub use provider::WeatherProvider;
pub use proximity::{LocationEvent, LocationPlatform, ProximityManager};
pub use weather::WeatherStatusManager;
