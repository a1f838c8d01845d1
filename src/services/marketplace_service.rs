// src/services/marketplace_service.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing;

use crate::{
    errors::MarketplaceError as AppError,
    models::{
        driver::{Coordinates, Driver},
        request::{DashboardMetrics, RequestStatus, TransportRequest},
    },
    services::store::{HashOperations, KeyOperations, SetOperations, Store, StoreKeys},
};

/// Record store for driver profiles, transport requests and dashboard counters.
#[async_trait]
pub trait MarketplaceOperations: Send + Sync {
    async fn add_driver(&self, driver: &Driver) -> Result<(), AppError>;
    async fn remove_driver(&self, driver_id: &str) -> Result<(), AppError>;
    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError>;
    async fn get_all_drivers(&self) -> Result<Vec<Driver>, AppError>;
    async fn set_driver_field(&self, driver_id: &str, field: &str, value: &str) -> Result<(), AppError>;
    /// Moves an existing driver. Other profile fields are left as they are; returns `false`
    /// when the driver no longer exists.
    async fn update_driver_position(
        &self,
        driver_id: &str,
        coordinates: Coordinates,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn add_request(&self, request: &TransportRequest) -> Result<(), AppError>;
    async fn remove_request(&self, request_id: &str) -> Result<(), AppError>;
    async fn get_request(&self, request_id: &str) -> Result<Option<TransportRequest>, AppError>;
    async fn get_all_requests(&self) -> Result<Vec<TransportRequest>, AppError>;
    /// Flips an available request to assigned. Returns `false` if it was not available.
    async fn assign_request(&self, request_id: &str, driver_id: &str) -> Result<bool, AppError>;

    async fn update_dashboard_metrics(&self, metrics: &DashboardMetrics) -> Result<(), AppError>;
    async fn get_dashboard_metrics(&self) -> Result<DashboardMetrics, AppError>;
}

pub struct MarketplaceService {
    store: Arc<Store>,
}

impl MarketplaceService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MarketplaceOperations for MarketplaceService {
    async fn add_driver(&self, driver: &Driver) -> Result<(), AppError> {
        if driver.id.trim().is_empty() {
            return Err(AppError::validation_error("id", "Driver ID must not be empty"));
        }

        self.store
            .hash_set_multiple(&StoreKeys::driver(&driver.id), &driver.to_fields())
            .await?;
        self.store.set_add(StoreKeys::active_drivers(), &driver.id).await?;

        tracing::debug!("Stored driver {} ({})", driver.id, driver.status);
        Ok(())
    }

    async fn remove_driver(&self, driver_id: &str) -> Result<(), AppError> {
        self.store.set_remove(StoreKeys::active_drivers(), driver_id).await?;
        self.store.delete(&StoreKeys::driver(driver_id)).await?;
        tracing::info!("Removed driver: {}", driver_id);
        Ok(())
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError> {
        let raw = self.store.hash_get_all(&StoreKeys::driver(driver_id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Driver::from_fields(&raw))
    }

    async fn get_all_drivers(&self) -> Result<Vec<Driver>, AppError> {
        let ids = self.store.set_members(StoreKeys::active_drivers()).await?;

        let mut drivers = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_driver(&id).await? {
                Some(driver) => drivers.push(driver),
                None => tracing::warn!("Active driver {} has no profile", id),
            }
        }
        drivers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(drivers)
    }

    async fn set_driver_field(&self, driver_id: &str, field: &str, value: &str) -> Result<(), AppError> {
        self.store.hash_set(&StoreKeys::driver(driver_id), field, value).await?;
        Ok(())
    }

    async fn update_driver_position(
        &self,
        driver_id: &str,
        coordinates: Coordinates,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updates = [
            ("lat".to_string(), coordinates.lat.to_string()),
            ("lng".to_string(), coordinates.lng.to_string()),
            ("lastUpdated".to_string(), at.to_rfc3339()),
        ];
        // Keyed on the id field so a concurrently removed driver stays removed
        let moved = self
            .store
            .hash_compare_and_set(&StoreKeys::driver(driver_id), "id", driver_id, &updates)
            .await?;
        Ok(moved)
    }

    async fn add_request(&self, request: &TransportRequest) -> Result<(), AppError> {
        if request.id.trim().is_empty() {
            return Err(AppError::validation_error("id", "Request ID must not be empty"));
        }

        self.store
            .hash_set_multiple(&StoreKeys::request(&request.id), &request.to_fields())
            .await?;
        self.store.set_add(StoreKeys::active_requests(), &request.id).await?;

        tracing::debug!("Stored request {} ({})", request.id, request.status);
        Ok(())
    }

    async fn remove_request(&self, request_id: &str) -> Result<(), AppError> {
        self.store.set_remove(StoreKeys::active_requests(), request_id).await?;
        self.store.delete(&StoreKeys::request(request_id)).await?;
        tracing::debug!("Removed request: {}", request_id);
        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<TransportRequest>, AppError> {
        let raw = self.store.hash_get_all(&StoreKeys::request(request_id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }

        let request = TransportRequest::from_fields(&raw);
        if request.is_none() {
            tracing::warn!("Request {} has an unreadable record", request_id);
        }
        Ok(request)
    }

    async fn get_all_requests(&self) -> Result<Vec<TransportRequest>, AppError> {
        let ids = self.store.set_members(StoreKeys::active_requests()).await?;

        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.get_request(&id).await? {
                requests.push(request);
            }
        }
        // Newest first
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn assign_request(&self, request_id: &str, driver_id: &str) -> Result<bool, AppError> {
        let updates = vec![
            ("status".to_string(), RequestStatus::Assigned.to_string()),
            ("assignedDriver".to_string(), driver_id.to_string()),
        ];

        let assigned = self
            .store
            .hash_compare_and_set(
                &StoreKeys::request(request_id),
                "status",
                RequestStatus::Available.as_str(),
                &updates,
            )
            .await?;

        if assigned {
            tracing::info!("Request {} assigned to driver {}", request_id, driver_id);
        }
        Ok(assigned)
    }

    async fn update_dashboard_metrics(&self, metrics: &DashboardMetrics) -> Result<(), AppError> {
        let mut fields = metrics.to_fields();
        fields.push(("lastUpdated".to_string(), Utc::now().to_rfc3339()));
        self.store
            .hash_set_multiple(StoreKeys::dashboard_metrics(), &fields)
            .await?;
        Ok(())
    }

    async fn get_dashboard_metrics(&self) -> Result<DashboardMetrics, AppError> {
        let raw = self.store.hash_get_all(StoreKeys::dashboard_metrics()).await?;
        Ok(DashboardMetrics::from_fields(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        driver::{Coordinates, DriverStatus},
        request::InsuranceCarrier,
    };
    use chrono::Duration;

    fn service() -> MarketplaceService {
        MarketplaceService::new(Arc::new(Store::memory()))
    }

    fn driver(id: &str) -> Driver {
        Driver {
            id: id.to_string(),
            name: "Lee Park".to_string(),
            vehicle: "Honda Odyssey".to_string(),
            photo: String::new(),
            wheelchair_certified: false,
            rating: 4.5,
            coordinates: Coordinates { lat: 37.77, lng: -122.42 },
            status: DriverStatus::Available,
            last_updated: Utc::now(),
        }
    }

    fn request(id: &str, age_minutes: i64) -> TransportRequest {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        TransportRequest {
            id: id.to_string(),
            scheduled_time: created_at + Duration::hours(3),
            distance: 6.5,
            coordinates: Coordinates { lat: 37.78, lng: -122.41 },
            address: "400 Pine Street".to_string(),
            phone: "(555) 123-4567".to_string(),
            requires_wheelchair: false,
            insurance_carrier: InsuranceCarrier::Medicare,
            status: RequestStatus::Available,
            created_at,
            payment: Some(30.0),
            assigned_driver: None,
        }
    }

    #[tokio::test]
    async fn test_missing_records_are_none() {
        let service = service();
        assert!(service.get_driver("nobody").await.unwrap().is_none());
        assert!(service.get_request("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_driver_lifecycle() {
        let service = service();
        service.add_driver(&driver("drv-b")).await.unwrap();
        service.add_driver(&driver("drv-a")).await.unwrap();

        let ids: Vec<_> = service.get_all_drivers().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["drv-a", "drv-b"]);

        service.set_driver_field("drv-a", "rating", "3.9").await.unwrap();
        assert_eq!(service.get_driver("drv-a").await.unwrap().unwrap().rating, 3.9);

        service.remove_driver("drv-a").await.unwrap();
        assert!(service.get_driver("drv-a").await.unwrap().is_none());
        assert_eq!(service.get_all_drivers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_position_update_touches_only_position() {
        let service = service();
        service.add_driver(&driver("drv-a")).await.unwrap();
        service.set_driver_field("drv-a", "rating", "3.9").await.unwrap();
        service.set_driver_field("drv-a", "status", "busy").await.unwrap();

        let at = Utc::now();
        let moved = service
            .update_driver_position("drv-a", Coordinates { lat: 40.0, lng: -74.0 }, at)
            .await
            .unwrap();
        assert!(moved);

        let stored = service.get_driver("drv-a").await.unwrap().unwrap();
        assert_eq!(stored.coordinates, Coordinates { lat: 40.0, lng: -74.0 });
        assert_eq!(stored.rating, 3.9);
        assert_eq!(stored.status, DriverStatus::Busy);
    }

    #[tokio::test]
    async fn test_position_update_skips_removed_driver() {
        let service = service();
        service.add_driver(&driver("drv-a")).await.unwrap();
        service.remove_driver("drv-a").await.unwrap();

        let moved = service
            .update_driver_position("drv-a", Coordinates { lat: 1.0, lng: 2.0 }, Utc::now())
            .await
            .unwrap();
        assert!(!moved);
        assert!(service.get_driver("drv-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requests_listed_newest_first() {
        let service = service();
        service.add_request(&request("req-old", 120)).await.unwrap();
        service.add_request(&request("req-new", 1)).await.unwrap();
        service.add_request(&request("req-mid", 30)).await.unwrap();

        let ids: Vec<_> = service.get_all_requests().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["req-new", "req-mid", "req-old"]);

        service.remove_request("req-mid").await.unwrap();
        assert_eq!(service.get_all_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_assign_request_only_once() {
        let service = service();
        service.add_request(&request("req-1", 5)).await.unwrap();

        assert!(service.assign_request("req-1", "drv-1").await.unwrap());
        assert!(!service.assign_request("req-1", "drv-2").await.unwrap());

        let stored = service.get_request("req-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Assigned);
        assert_eq!(stored.assigned_driver.as_deref(), Some("drv-1"));
    }

    #[tokio::test]
    async fn test_assign_missing_request_creates_nothing() {
        let service = service();
        assert!(!service.assign_request("ghost", "drv-1").await.unwrap());
        assert!(service.get_request("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dashboard_metrics() {
        let service = service();
        assert_eq!(service.get_dashboard_metrics().await.unwrap(), DashboardMetrics::default());

        let metrics = DashboardMetrics { request_volume: 10, active_drivers: 20, nearby_drivers: 8 };
        service.update_dashboard_metrics(&metrics).await.unwrap();
        assert_eq!(service.get_dashboard_metrics().await.unwrap(), metrics);
    }
}
