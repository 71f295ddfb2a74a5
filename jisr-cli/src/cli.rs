use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Select, Text};
use jisr_core::{
    ActionIntent, Coordinate, DeploymentConfig, IntentKind, StatusCoordinator, WeatherProvider,
    compose::{ActionMessageComposer, MapLinkBuilder, TIMESTAMP_FIELD},
    model::{ProximityState, WeatherDisplay, WeatherStatus},
    provider::provider_from_config,
    proximity::{AuthorizationDecision, UpdateMode, event_channel},
};

use crate::platform::SimulatedPlatform;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "jisr", version, about = "Point-of-interest status engine")]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set the target, arrival threshold and message recipient.
    Configure,

    /// Print the effective configuration as TOML.
    ShowConfig,

    /// Fetch and classify the current weather at the target.
    Weather,

    /// Feed one position fix through the proximity manager.
    Distance {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Simulate the user refusing location access.
        #[arg(long)]
        deny: bool,
    },

    /// Compose an outbound message link.
    Compose {
        /// booking, order, service-request, lost-and-found or custom.
        kind: String,

        /// Template field, e.g. `-f name=Ali`. Repeatable.
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// ISO-8601 time for the booking; defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Print the map deep link for the target.
    Map,

    /// Weather, distance and links in one go.
    Status {
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.load_config()?;

        match self.command {
            Command::Configure => configure(config, self.config),
            Command::ShowConfig => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            Command::Weather => {
                let provider: Arc<dyn WeatherProvider> =
                    Arc::from(provider_from_config(&config.weather)?);
                let manager =
                    jisr_core::WeatherStatusManager::new(provider, config.weather.in_flight);

                if let Err(err) = manager.request_snapshot(config.target.coordinate()).await {
                    tracing::debug!(error = %err, "weather fetch failed");
                }
                println!("{}: {}", config.target.name, describe_weather(&manager.current()));
                Ok(())
            }
            Command::Distance { lat, lon, deny } => {
                let decision = if deny {
                    AuthorizationDecision::Denied
                } else {
                    AuthorizationDecision::Granted
                };
                let state = simulate_proximity(&config, decision, Some(Coordinate::new(lat, lon)))?;
                print_proximity(&state);
                Ok(())
            }
            Command::Compose { kind, fields, at } => {
                let kind = IntentKind::try_from(kind.as_str())?;
                let composer = ActionMessageComposer::new(&config.messaging)
                    .map_err(|e| anyhow!("{e}\nHint: run `jisr configure` to set the recipient."))?;

                let mut intent = ActionIntent::new(kind);
                for (key, value) in fields {
                    intent = intent.with_field(key, value);
                }
                let template = composer.template(kind)?;
                if template.fields().any(|f| f == TIMESTAMP_FIELD)
                    && intent.field(TIMESTAMP_FIELD).is_none()
                {
                    let when = at.unwrap_or_else(|| {
                        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
                    });
                    intent = intent.with_field(TIMESTAMP_FIELD, when);
                }

                let uri = composer.compose(&intent).with_context(|| {
                    let needed: Vec<&str> = template.fields().collect();
                    format!("Could not compose {kind} message (fields: {})", needed.join(", "))
                })?;
                println!("{uri}");
                Ok(())
            }
            Command::Map => {
                let builder = MapLinkBuilder::new(&config.map)?;
                println!("{}", builder.link(config.target.coordinate()));
                Ok(())
            }
            Command::Status { lat, lon } => {
                let fix = lat.zip(lon).map(|(lat, lon)| Coordinate::new(lat, lon));
                status(config, fix).await
            }
        }
    }

    fn load_config(&self) -> anyhow::Result<DeploymentConfig> {
        match &self.config {
            Some(path) if path.exists() => DeploymentConfig::load_from(path),
            Some(_) => Ok(DeploymentConfig::default()),
            None => DeploymentConfig::load(),
        }
    }
}

fn configure(mut config: DeploymentConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    config.target.name = Text::new("Point of interest name:")
        .with_default(&config.target.name)
        .prompt()?;

    let latitude = CustomType::<f64>::new("Target latitude:")
        .with_default(config.target.latitude)
        .prompt()?;
    let longitude = CustomType::<f64>::new("Target longitude:")
        .with_default(config.target.longitude)
        .prompt()?;
    config.set_target(Coordinate::try_new(latitude, longitude)?);

    config.proximity.arrival_threshold_km = CustomType::<f64>::new("Arrival threshold (km):")
        .with_default(config.proximity.arrival_threshold_km)
        .prompt()?;

    let modes = vec!["continuous", "single-shot"];
    let start = match config.proximity.update_mode {
        UpdateMode::Continuous => 0,
        UpdateMode::SingleShot => 1,
    };
    config.proximity.update_mode = match Select::new("Position updates:", modes)
        .with_starting_cursor(start)
        .prompt()?
    {
        "single-shot" => UpdateMode::SingleShot,
        _ => UpdateMode::Continuous,
    };

    let phone = Text::new("Recipient phone number (digits, optional leading +):")
        .with_default(config.messaging.recipient_phone.as_deref().unwrap_or_default())
        .prompt()?;
    config.set_recipient_phone(phone.trim());

    config.validate()?;
    ActionMessageComposer::new(&config.messaging)?;

    let saved = match path {
        Some(path) => {
            config.save_to(&path)?;
            path
        }
        None => config.save()?,
    };
    println!("Saved configuration to {}", saved.display());
    Ok(())
}

async fn status(config: DeploymentConfig, fix: Option<Coordinate>) -> anyhow::Result<()> {
    let provider: Arc<dyn WeatherProvider> = Arc::from(provider_from_config(&config.weather)?);
    let (tx, mut rx) = event_channel();
    let platform = Arc::new(SimulatedPlatform::new(tx, AuthorizationDecision::Granted, fix));

    let coordinator = StatusCoordinator::from_config(config, provider, platform)
        .map_err(|e| anyhow!("{e}\nHint: run `jisr configure` first."))?;
    coordinator.proximity().drain(&mut rx);

    if let Err(err) = coordinator.refresh_weather().await {
        tracing::debug!(error = %err, "weather fetch failed");
    }

    println!("{}", coordinator.config().target.name);
    println!("  weather:  {}", describe_weather(&coordinator.weather_status().borrow()));
    print_proximity(&coordinator.proximity_state().borrow());
    println!("  map:      {}", coordinator.map_link());

    coordinator.shutdown();
    Ok(())
}

fn simulate_proximity(
    config: &DeploymentConfig,
    decision: AuthorizationDecision,
    fix: Option<Coordinate>,
) -> anyhow::Result<ProximityState> {
    config.validate()?;
    let (tx, mut rx) = event_channel();
    let platform = Arc::new(SimulatedPlatform::new(tx, decision, fix));
    let manager = jisr_core::ProximityManager::new(
        platform,
        config.target.coordinate(),
        config.proximity.clone(),
    );
    manager.drain(&mut rx);
    Ok(manager.current())
}

fn describe_weather(status: &WeatherStatus) -> String {
    match status.display() {
        WeatherDisplay::Snapshot(s) => format!(
            "{:.1}°C, {} [{}] (code {})",
            s.temperature_celsius,
            s.condition.description(),
            s.icon_token,
            s.weather_code
        ),
        WeatherDisplay::Loading => "updating…".to_string(),
        WeatherDisplay::Error(message) => message.to_string(),
        WeatherDisplay::Empty => "no data".to_string(),
    }
}

fn print_proximity(state: &ProximityState) {
    println!("  location: {} ({})", state.display_text, state.authorization);
    if let Some(position) = state.position {
        println!(
            "  you:      {} -> {:.3} km from {}",
            position.coordinate, position.distance_km, state.target
        );
    }
}
