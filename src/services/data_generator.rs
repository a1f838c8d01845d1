// src/services/data_generator.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::{
    errors::MarketplaceError as AppError,
    models::{
        driver::{Coordinates, Driver, DriverStatus},
        messages::ServerMessage,
        metrics::round_to,
        request::{DashboardMetrics, InsuranceCarrier, RequestStatus, TransportRequest},
    },
    services::{
        connection_hub::ConnectionHub,
        driver_metrics_service::{DriverMetricsOperations, DriverMetricsService},
        marketplace_service::{MarketplaceOperations, MarketplaceService},
        task_supervisor::TaskSupervisor,
    },
    utils::id_generator::{generate_driver_id, generate_request_id},
};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Ben", "Carmen", "Darius", "Elena", "Farid", "Grace", "Hector", "Iris", "Jamal",
    "Keiko", "Luis", "Maya", "Nikolai", "Olivia", "Priya", "Quinn", "Rosa", "Samuel", "Tara",
];
const LAST_NAMES: &[&str] = &[
    "Alvarez", "Brooks", "Chen", "Dubois", "Edwards", "Fischer", "Garcia", "Hughes", "Ibrahim",
    "Jensen", "Kowalski", "Lopez", "Morgan", "Nguyen", "Okafor", "Patel", "Reyes", "Schmidt",
];
const VEHICLES: &[&str] = &[
    "Toyota Sienna", "Honda Odyssey", "Chrysler Pacifica", "Ford Transit", "Dodge Grand Caravan",
    "Mercedes-Benz Sprinter", "Kia Carnival", "Chevrolet Express",
];
const STREETS: &[&str] = &[
    "Maple", "Oak", "Cedar", "Elm", "Washington", "Lake", "Hill", "Park", "Pine", "Sunset",
];
const STREET_SUFFIXES: &[&str] = &["Street", "Avenue", "Boulevard", "Road", "Lane", "Drive"];

// Half-width of the coordinate jitter applied per move tick, in degrees
const MOVE_JITTER: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub seed_drivers: usize,
    pub seed_requests: usize,
    pub new_request_probability: f64,
    pub nearby_driver_ratio: f64,
    pub request_interval: Duration,
    pub driver_move_interval: Duration,
    pub metrics_interval: Duration,
    pub cleanup_interval: Duration,
    pub request_max_age: ChronoDuration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed_drivers: 20,
            seed_requests: 10,
            new_request_probability: 0.3,
            nearby_driver_ratio: 0.4,
            request_interval: Duration::from_secs(5),
            driver_move_interval: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
            request_max_age: ChronoDuration::hours(24),
        }
    }
}

/// Simulated marketplace activity for demos and local development.
pub struct DataGenerator {
    marketplace: Arc<MarketplaceService>,
    metrics_service: Arc<DriverMetricsService>,
    hub: ConnectionHub,
    config: GeneratorConfig,
}

impl DataGenerator {
    pub fn new(
        marketplace: Arc<MarketplaceService>,
        metrics_service: Arc<DriverMetricsService>,
        hub: ConnectionHub,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            marketplace,
            metrics_service,
            hub,
            config,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Populates the initial driver pool and request feed.
    pub async fn seed(&self) -> Result<(), AppError> {
        tracing::info!("Generating initial marketplace data...");

        for _ in 0..self.config.seed_drivers {
            self.generate_driver().await?;
        }
        tracing::info!("Generated {} drivers", self.config.seed_drivers);

        for _ in 0..self.config.seed_requests {
            self.generate_request().await?;
        }
        tracing::info!("Generated {} requests", self.config.seed_requests);

        self.refresh_dashboard_metrics().await?;
        Ok(())
    }

    pub async fn generate_driver(&self) -> Result<Driver, AppError> {
        let driver = random_driver(Utc::now());
        self.marketplace.add_driver(&driver).await?;
        self.metrics_service.initialize_driver_metrics(&driver.id).await?;
        Ok(driver)
    }

    /// Creates a request and announces it as `new_request`.
    pub async fn generate_request(&self) -> Result<TransportRequest, AppError> {
        let request = random_request(Utc::now());
        self.marketplace.add_request(&request).await?;
        self.hub.publish(ServerMessage::NewRequest {
            request: request.clone(),
        });
        tracing::debug!("Generated request {}", request.id);
        Ok(request)
    }

    pub async fn maybe_generate_request(&self) -> Result<Option<TransportRequest>, AppError> {
        let roll = rand::rng().random_bool(self.config.new_request_probability.clamp(0.0, 1.0));
        if !roll {
            return Ok(None);
        }
        self.generate_request().await.map(Some)
    }

    /// Nudges every driver's position. Returns how many moved.
    /// Only position fields are written, so ratings and status changed meanwhile survive.
    pub async fn move_drivers(&self) -> Result<usize, AppError> {
        let drivers = self.marketplace.get_all_drivers().await?;
        let now = Utc::now();
        let targets: Vec<(String, Coordinates)> = {
            let mut rng = rand::rng();
            drivers
                .into_iter()
                .map(|driver| {
                    let coordinates = Coordinates {
                        lat: driver.coordinates.lat + rng.random_range(-MOVE_JITTER..=MOVE_JITTER),
                        lng: driver.coordinates.lng + rng.random_range(-MOVE_JITTER..=MOVE_JITTER),
                    };
                    (driver.id, coordinates)
                })
                .collect()
        };

        let mut moved = 0;
        for (driver_id, coordinates) in targets {
            if self.marketplace.update_driver_position(&driver_id, coordinates, now).await? {
                moved += 1;
            } else {
                tracing::debug!("Driver {} vanished before it could move", driver_id);
            }
        }
        Ok(moved)
    }

    /// Recomputes dashboard counters and announces them as `metrics_update`.
    pub async fn refresh_dashboard_metrics(&self) -> Result<DashboardMetrics, AppError> {
        let drivers = self.marketplace.get_all_drivers().await?;
        let requests = self.marketplace.get_all_requests().await?;

        let metrics = DashboardMetrics {
            request_volume: requests.len() as u64,
            active_drivers: drivers.len() as u64,
            nearby_drivers: (drivers.len() as f64 * self.config.nearby_driver_ratio).floor() as u64,
        };

        self.marketplace.update_dashboard_metrics(&metrics).await?;
        self.hub.publish(ServerMessage::MetricsUpdate { metrics });
        Ok(metrics)
    }

    /// Drops requests created more than `request_max_age` before `now`.
    pub async fn cleanup_stale_requests(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let requests = self.marketplace.get_all_requests().await?;

        let mut removed = 0;
        for request in requests.iter().filter(|r| r.age(now) > self.config.request_max_age) {
            self.marketplace.remove_request(&request.id).await?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!("Removed {} stale request(s)", removed);
        }
        Ok(removed)
    }

    /// Registers the four periodic jobs on `supervisor`.
    pub fn schedule(self: Arc<Self>, supervisor: &mut TaskSupervisor) {
        let generator = self.clone();
        supervisor.spawn_periodic("request-generator", self.config.request_interval, move || {
            let generator = generator.clone();
            async move { generator.maybe_generate_request().await.map(|_| ()) }
        });

        let generator = self.clone();
        supervisor.spawn_periodic("driver-mover", self.config.driver_move_interval, move || {
            let generator = generator.clone();
            async move { generator.move_drivers().await.map(|_| ()) }
        });

        let generator = self.clone();
        supervisor.spawn_periodic("metrics-refresh", self.config.metrics_interval, move || {
            let generator = generator.clone();
            async move { generator.refresh_dashboard_metrics().await.map(|_| ()) }
        });

        let generator = self;
        let cleanup_interval = generator.config.cleanup_interval;
        supervisor.spawn_periodic("request-cleanup", cleanup_interval, move || {
            let generator = generator.clone();
            async move { generator.cleanup_stale_requests(Utc::now()).await.map(|_| ()) }
        });
    }
}

fn pick<'a>(rng: &mut impl Rng, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn random_coordinates(rng: &mut impl Rng) -> Coordinates {
    Coordinates {
        lat: round_to(rng.random_range(-90.0..=90.0), 6),
        lng: round_to(rng.random_range(-180.0..=180.0), 6),
    }
}

pub fn random_driver(now: DateTime<Utc>) -> Driver {
    let mut rng = rand::rng();
    let id = generate_driver_id();
    let name = format!("{} {}", pick(&mut rng, FIRST_NAMES), pick(&mut rng, LAST_NAMES));

    Driver {
        photo: format!("https://i.pravatar.cc/150?u={}", id),
        id,
        name,
        vehicle: pick(&mut rng, VEHICLES).to_string(),
        wheelchair_certified: rng.random_bool(0.3),
        rating: round_to(rng.random_range(4.0..=5.0), 1),
        coordinates: random_coordinates(&mut rng),
        status: DriverStatus::Available,
        last_updated: now,
    }
}

pub fn random_request(now: DateTime<Utc>) -> TransportRequest {
    let mut rng = rand::rng();
    let scheduled_in = ChronoDuration::seconds(rng.random_range(60..=24 * 60 * 60));

    TransportRequest {
        id: generate_request_id(),
        scheduled_time: now + scheduled_in,
        distance: round_to(rng.random_range(2.0..=10.0), 1),
        coordinates: random_coordinates(&mut rng),
        address: format!(
            "{} {} {}",
            rng.random_range(1..=9999),
            pick(&mut rng, STREETS),
            pick(&mut rng, STREET_SUFFIXES)
        ),
        phone: format!(
            "({}) {}-{:04}",
            rng.random_range(201..=989),
            rng.random_range(200..=999),
            rng.random_range(0..=9999)
        ),
        requires_wheelchair: rng.random_bool(0.3),
        insurance_carrier: *InsuranceCarrier::ALL.choose(&mut rng).unwrap_or(&InsuranceCarrier::Private),
        status: RequestStatus::Available,
        created_at: now,
        payment: Some(round_to(rng.random_range(25.0..=75.0), 2)),
        assigned_driver: None,
    }
}
