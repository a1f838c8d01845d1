// src/services/driver_metrics_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::MarketplaceError as AppError,
    models::metrics::{
        fields, DriverMetrics, DriverScorecard, ScoreWeights, TripCompletion, HISTORY_CAPACITY,
    },
    services::store::{HashOperations, KeyOperations, ListOperations, Store, StoreKeys, StoreOp},
};

#[async_trait]
pub trait DriverMetricsOperations: Send + Sync {
    /// Creates the metrics record if absent. Returns `false` when one already existed.
    async fn initialize_driver_metrics(&self, driver_id: &str) -> Result<bool, AppError>;
    /// Returns the new rounded average rating.
    async fn update_driver_rating(&self, driver_id: &str, rating: f64) -> Result<f64, AppError>;
    async fn record_trip_completion(&self, driver_id: &str, completion: TripCompletion) -> Result<DriverMetrics, AppError>;
    async fn record_trip_cancellation(&self, driver_id: &str) -> Result<DriverMetrics, AppError>;
    async fn record_offer_response(&self, driver_id: &str, accepted: bool, response_seconds: f64) -> Result<DriverMetrics, AppError>;
    async fn get_driver_metrics(&self, driver_id: &str) -> Result<DriverMetrics, AppError>;
    async fn get_driver_history(&self, driver_id: &str, limit: usize) -> Result<Vec<TripCompletion>, AppError>;
    async fn calculate_driver_score(&self, driver_id: &str) -> Result<f64, AppError>;
    async fn get_driver_scorecard(&self, driver_id: &str) -> Result<DriverScorecard, AppError>;
}

pub struct DriverMetricsService {
    store: Arc<Store>,
    weights: ScoreWeights,
}

impl DriverMetricsService {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_weights(store, ScoreWeights::STANDARD)
    }

    pub fn with_weights(store: Arc<Store>, weights: ScoreWeights) -> Self {
        Self { store, weights }
    }

    fn validate_driver_id(driver_id: &str) -> Result<(), AppError> {
        if driver_id.trim().is_empty() {
            return Err(AppError::validation_error("driver_id", "Driver ID must not be empty"));
        }
        Ok(())
    }

    fn validate_rating(rating: f64) -> Result<(), AppError> {
        // Range is the caller's business; only NaN/inf would poison the sums
        if !rating.is_finite() {
            return Err(AppError::invalid_field("rating", rating, "rating must be a finite number"));
        }
        Ok(())
    }

    /// Counter bumps plus the profile's rounded average, recomputed inside the same batch.
    /// The profile is left alone when the driver has none.
    fn rating_ops(driver_id: &str, rating: f64) -> [StoreOp; 3] {
        let metrics_key = StoreKeys::driver_metrics(driver_id);
        [
            StoreOp::hash_increment(&metrics_key, fields::TOTAL_RATINGS, 1),
            StoreOp::hash_increment_float(&metrics_key, fields::RATING_SUM, rating),
            StoreOp::hash_set_mean(
                &StoreKeys::driver(driver_id),
                "rating",
                &metrics_key,
                fields::RATING_SUM,
                fields::TOTAL_RATINGS,
                1,
            ),
        ]
    }

    fn touch_op(metrics_key: &str) -> StoreOp {
        StoreOp::hash_set(metrics_key, fields::LAST_UPDATED, Utc::now().to_rfc3339())
    }
}

#[async_trait]
impl DriverMetricsOperations for DriverMetricsService {
    async fn initialize_driver_metrics(&self, driver_id: &str) -> Result<bool, AppError> {
        Self::validate_driver_id(driver_id)?;

        let created = self
            .store
            .hash_create(&StoreKeys::driver_metrics(driver_id), &DriverMetrics::initial_fields(Utc::now()))
            .await?;

        if created {
            tracing::info!("Initialized metrics for driver: {}", driver_id);
        } else {
            tracing::debug!("Metrics already exist for driver {}, leaving them untouched", driver_id);
        }
        Ok(created)
    }

    async fn update_driver_rating(&self, driver_id: &str, rating: f64) -> Result<f64, AppError> {
        Self::validate_driver_id(driver_id)?;
        Self::validate_rating(rating)?;

        let metrics_key = StoreKeys::driver_metrics(driver_id);
        let mut ops = Self::rating_ops(driver_id, rating).to_vec();
        ops.push(Self::touch_op(&metrics_key));
        self.store.execute_atomic(&ops).await?;

        let metrics = self.get_driver_metrics(driver_id).await?;
        let average = metrics.average_rating().unwrap_or(0.0);

        tracing::info!(
            "Driver {} rated {} ({} ratings, average {:.1})",
            driver_id, rating, metrics.total_ratings, average
        );
        Ok(average)
    }

    async fn record_trip_completion(&self, driver_id: &str, completion: TripCompletion) -> Result<DriverMetrics, AppError> {
        Self::validate_driver_id(driver_id)?;
        if let Some(rating) = completion.patient_rating {
            Self::validate_rating(rating)?;
        }

        let metrics_key = StoreKeys::driver_metrics(driver_id);
        let history_key = StoreKeys::driver_history(driver_id);
        let entry = serde_json::to_string(&completion)?;

        // History append, trim and every counter land in one transaction
        let mut ops = vec![
            StoreOp::list_push_front(&history_key, entry),
            StoreOp::list_trim(&history_key, 0, HISTORY_CAPACITY as isize - 1),
            StoreOp::hash_increment(&metrics_key, fields::COMPLETED_TRIPS, 1),
        ];
        if completion.was_on_time {
            ops.push(StoreOp::hash_increment(&metrics_key, fields::ON_TIME_TRIPS, 1));
        }
        if completion.wheelchair_trip {
            ops.push(StoreOp::hash_increment(&metrics_key, fields::WHEELCHAIR_TRIPS_COMPLETED, 1));
        }
        if let Some(rating) = completion.patient_rating {
            ops.extend(Self::rating_ops(driver_id, rating));
        }
        ops.push(Self::touch_op(&metrics_key));

        self.store.execute_atomic(&ops).await?;

        let metrics = self.get_driver_metrics(driver_id).await?;

        tracing::info!(
            "Recorded trip {} for driver {} (on time: {}, {}/{} on time)",
            completion.request_id, driver_id, completion.was_on_time, metrics.on_time_trips, metrics.completed_trips
        );
        Ok(metrics)
    }

    async fn record_trip_cancellation(&self, driver_id: &str) -> Result<DriverMetrics, AppError> {
        Self::validate_driver_id(driver_id)?;

        let metrics_key = StoreKeys::driver_metrics(driver_id);
        self.store
            .execute_atomic(&[
                StoreOp::hash_increment(&metrics_key, fields::CANCELLED_TRIPS, 1),
                Self::touch_op(&metrics_key),
            ])
            .await?;

        tracing::info!("Recorded cancellation for driver: {}", driver_id);
        self.get_driver_metrics(driver_id).await
    }

    async fn record_offer_response(&self, driver_id: &str, accepted: bool, response_seconds: f64) -> Result<DriverMetrics, AppError> {
        Self::validate_driver_id(driver_id)?;
        if !response_seconds.is_finite() || response_seconds < 0.0 {
            return Err(AppError::invalid_field(
                "responseSeconds",
                response_seconds,
                "response time must be a non-negative number of seconds",
            ));
        }

        let metrics_key = StoreKeys::driver_metrics(driver_id);
        let mut ops = vec![
            StoreOp::hash_increment(&metrics_key, fields::OFFERS_RECEIVED, 1),
            StoreOp::hash_increment_float(&metrics_key, fields::RESPONSE_TIME_TOTAL, response_seconds),
            StoreOp::hash_increment(&metrics_key, fields::RESPONSE_COUNT, 1),
        ];
        if accepted {
            ops.push(StoreOp::hash_increment(&metrics_key, fields::OFFERS_ACCEPTED, 1));
        }
        ops.push(Self::touch_op(&metrics_key));
        self.store.execute_atomic(&ops).await?;

        tracing::debug!(
            "Driver {} {} an offer after {:.1}s",
            driver_id,
            if accepted { "accepted" } else { "declined" },
            response_seconds
        );
        self.get_driver_metrics(driver_id).await
    }

    async fn get_driver_metrics(&self, driver_id: &str) -> Result<DriverMetrics, AppError> {
        tracing::debug!("Getting metrics for driver: {}", driver_id);
        let raw = self.store.hash_get_all(&StoreKeys::driver_metrics(driver_id)).await?;
        Ok(DriverMetrics::from_fields(&raw))
    }

    async fn get_driver_history(&self, driver_id: &str, limit: usize) -> Result<Vec<TripCompletion>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let entries = self
            .store
            .list_range(&StoreKeys::driver_history(driver_id), 0, stop)
            .await?;

        let history = entries
            .iter()
            .filter_map(|entry| match serde_json::from_str::<TripCompletion>(entry) {
                Ok(completion) => Some(completion),
                Err(e) => {
                    tracing::warn!("Skipping undecodable history entry for driver {}: {}", driver_id, e);
                    None
                }
            })
            .collect();

        Ok(history)
    }

    async fn calculate_driver_score(&self, driver_id: &str) -> Result<f64, AppError> {
        let metrics = self.get_driver_metrics(driver_id).await?;
        Ok(metrics.composite_score(&self.weights))
    }

    async fn get_driver_scorecard(&self, driver_id: &str) -> Result<DriverScorecard, AppError> {
        let metrics = self.get_driver_metrics(driver_id).await?;
        Ok(DriverScorecard {
            driver_id: driver_id.to_string(),
            score: metrics.composite_score(&self.weights),
            average_rating: metrics.average_rating(),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn service() -> (Arc<Store>, DriverMetricsService) {
        let store = Arc::new(Store::memory());
        (store.clone(), DriverMetricsService::new(store))
    }

    fn completion(request_id: &str, on_time: bool, rating: Option<f64>) -> TripCompletion {
        let scheduled = Utc::now() - Duration::minutes(30);
        TripCompletion {
            request_id: request_id.to_string(),
            scheduled_time: scheduled,
            completion_time: scheduled + Duration::minutes(if on_time { 10 } else { 45 }),
            was_on_time: on_time,
            patient_rating: rating,
            patient_feedback: None,
            wheelchair_trip: false,
        }
    }

    #[tokio::test]
    async fn test_initialize_is_create_if_absent() {
        let (_, service) = service();
        assert!(service.initialize_driver_metrics("drv-1").await.unwrap());
        service.record_trip_completion("drv-1", completion("req-1", true, None)).await.unwrap();

        assert!(!service.initialize_driver_metrics("drv-1").await.unwrap());
        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.completed_trips, 1);
    }

    #[tokio::test]
    async fn test_fresh_driver_score() {
        let (_, service) = service();
        service.initialize_driver_metrics("drv-1").await.unwrap();

        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.on_time_percentage, 100.0);
        assert_eq!(metrics.acceptance_rate, 100.0);
        assert_eq!(service.calculate_driver_score("drv-1").await.unwrap(), 0.55);
    }

    #[tokio::test]
    async fn test_uninitialized_driver_defaults_to_zero() {
        let (_, service) = service();
        let metrics = service.get_driver_metrics("ghost").await.unwrap();
        assert_eq!(metrics.completed_trips, 0);
        assert_eq!(metrics.on_time_percentage, 0.0);
        assert_eq!(service.calculate_driver_score("ghost").await.unwrap(), 0.1);
        assert!(service.get_driver_history("ghost", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ten_completions_eight_on_time_three_rated() {
        let (store, service) = service();
        store.hash_set(&StoreKeys::driver("drv-1"), "id", "drv-1").await.unwrap();
        service.initialize_driver_metrics("drv-1").await.unwrap();

        let ratings = [Some(5.0), Some(4.0), Some(3.0)];
        for i in 0..10 {
            let rating = ratings.get(i).copied().flatten();
            service
                .record_trip_completion("drv-1", completion(&format!("req-{}", i), i < 8, rating))
                .await
                .unwrap();
        }

        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.completed_trips, 10);
        assert_eq!(metrics.on_time_trips, 8);
        assert_eq!(metrics.on_time_percentage, 80.0);
        assert_eq!(metrics.rating_sum, 12.0);
        assert_eq!(metrics.total_ratings, 3);
        assert_eq!(metrics.average_rating(), Some(4.0));

        let profile = store.hash_get_all(&StoreKeys::driver("drv-1")).await.unwrap();
        assert_eq!(profile.get("rating").map(String::as_str), Some("4.0"));
    }

    #[tokio::test]
    async fn test_on_time_percentage_tracks_every_call() {
        let (_, service) = service();
        let pattern = [true, false, true, true, false, false, true];
        let mut on_time = 0;

        for (i, was_on_time) in pattern.iter().enumerate() {
            if *was_on_time {
                on_time += 1;
            }
            let metrics = service
                .record_trip_completion("drv-1", completion(&format!("req-{}", i), *was_on_time, None))
                .await
                .unwrap();
            assert_eq!(metrics.completed_trips, i as u64 + 1);
            assert_eq!(metrics.on_time_trips, on_time);
            assert_eq!(metrics.on_time_percentage, 100.0 * on_time as f64 / (i as f64 + 1.0));
        }
    }

    #[tokio::test]
    async fn test_rating_average_rounded_to_one_decimal() {
        let (store, service) = service();
        store.hash_set(&StoreKeys::driver("drv-1"), "id", "drv-1").await.unwrap();
        let ratings = [5.0, 4.0, 4.0];
        let mut average = 0.0;
        for rating in ratings {
            average = service.update_driver_rating("drv-1", rating).await.unwrap();
        }

        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.total_ratings, 3);
        assert_eq!(average, 4.3);

        let profile = store.hash_get_all(&StoreKeys::driver("drv-1")).await.unwrap();
        assert_eq!(profile.get("rating").map(String::as_str), Some("4.3"));
    }

    #[tokio::test]
    async fn test_non_finite_rating_rejected() {
        let (_, service) = service();
        assert!(service.update_driver_rating("drv-1", f64::NAN).await.is_err());
        assert!(service
            .record_trip_completion("drv-1", completion("req-1", true, Some(f64::INFINITY)))
            .await
            .is_err());

        // Nothing was written
        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.completed_trips, 0);
        assert_eq!(metrics.total_ratings, 0);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_newest_first() {
        let (_, service) = service();
        for i in 0..(HISTORY_CAPACITY + 5) {
            service
                .record_trip_completion("drv-1", completion(&format!("req-{}", i), true, None))
                .await
                .unwrap();
        }

        let history = service.get_driver_history("drv-1", 500).await.unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].request_id, format!("req-{}", HISTORY_CAPACITY + 4));
        assert_eq!(history[HISTORY_CAPACITY - 1].request_id, "req-5");

        let recent = service.get_driver_history("drv-1", 3).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|c| c.request_id.as_str()).collect();
        assert_eq!(ids, vec!["req-104", "req-103", "req-102"]);

        assert!(service.get_driver_history("drv-1", 0).await.unwrap().is_empty());

        // Counters keep going past the history cap
        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.completed_trips, HISTORY_CAPACITY as u64 + 5);
    }

    #[tokio::test]
    async fn test_undecodable_history_entries_are_skipped() {
        let (store, service) = service();
        service.record_trip_completion("drv-1", completion("req-1", true, None)).await.unwrap();
        store.list_push_front(&StoreKeys::driver_history("drv-1"), "{not json").await.unwrap();

        let history = service.get_driver_history("drv-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, "req-1");
    }

    #[tokio::test]
    async fn test_wheelchair_and_cancellation_counters() {
        let (_, service) = service();
        let mut trip = completion("req-1", true, None);
        trip.wheelchair_trip = true;
        service.record_trip_completion("drv-1", trip).await.unwrap();
        service.record_trip_completion("drv-1", completion("req-2", true, None)).await.unwrap();
        let metrics = service.record_trip_cancellation("drv-1").await.unwrap();

        assert_eq!(metrics.wheelchair_trips_completed, 1);
        assert_eq!(metrics.cancelled_trips, 1);
        assert_eq!(metrics.completed_trips, 2);
    }

    #[tokio::test]
    async fn test_offer_responses_feed_acceptance_and_response_time() {
        let (_, service) = service();
        service.initialize_driver_metrics("drv-1").await.unwrap();

        service.record_offer_response("drv-1", true, 20.0).await.unwrap();
        service.record_offer_response("drv-1", false, 40.0).await.unwrap();
        let metrics = service.record_offer_response("drv-1", true, 30.0).await.unwrap();

        assert!((metrics.acceptance_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.average_response_time, 30.0);
        assert!(service.record_offer_response("drv-1", true, -1.0).await.is_err());

        // 0.25 on-time prior + 0.20 * 2/3 acceptance + 0.10 * 0.5 response
        assert_eq!(service.calculate_driver_score("drv-1").await.unwrap(), 0.4333);
    }

    #[tokio::test]
    async fn test_scorecard() {
        let (_, service) = service();
        service.initialize_driver_metrics("drv-1").await.unwrap();
        service.update_driver_rating("drv-1", 5.0).await.unwrap();

        let scorecard = service.get_driver_scorecard("drv-1").await.unwrap();
        assert_eq!(scorecard.driver_id, "drv-1");
        assert_eq!(scorecard.average_rating, Some(5.0));
        // 0.30 rating + 0.25 + 0.20 + 0.10
        assert_eq!(scorecard.score, 0.85);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_lose_no_updates() {
        let (_, service) = service();
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..50 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .record_trip_completion("drv-1", completion(&format!("req-{}", i), i % 2 == 0, Some(4.0)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let metrics = service.get_driver_metrics("drv-1").await.unwrap();
        assert_eq!(metrics.completed_trips, 50);
        assert_eq!(metrics.on_time_trips, 25);
        assert_eq!(metrics.total_ratings, 50);
        assert_eq!(metrics.rating_sum, 200.0);
        assert_eq!(service.get_driver_history("drv-1", 100).await.unwrap().len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ratings_keep_profile_in_step() {
        let (store, service) = service();
        let service = Arc::new(service);
        store.hash_set(&StoreKeys::driver("drv-1"), "id", "drv-1").await.unwrap();

        for round in 0..5 {
            let mut handles = Vec::new();
            for i in 0..40 {
                let service = service.clone();
                let rating = if (i + round) % 2 == 0 { 1.0 } else { 5.0 };
                handles.push(tokio::spawn(async move { service.update_driver_rating("drv-1", rating).await }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let metrics = service.get_driver_metrics("drv-1").await.unwrap();
            let profile = store.hash_get_all(&StoreKeys::driver("drv-1")).await.unwrap();
            let expected = format!("{:.1}", metrics.average_rating().unwrap());
            assert_eq!(profile.get("rating"), Some(&expected), "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_rating_without_profile_creates_no_profile() {
        let (store, service) = service();
        assert_eq!(service.update_driver_rating("drv-9", 4.0).await.unwrap(), 4.0);
        service
            .record_trip_completion("drv-9", completion("req-1", true, Some(5.0)))
            .await
            .unwrap();

        assert!(!store.exists(&StoreKeys::driver("drv-9")).await.unwrap());
        let metrics = service.get_driver_metrics("drv-9").await.unwrap();
        assert_eq!(metrics.total_ratings, 2);
    }

    #[tokio::test]
    async fn test_empty_driver_id_rejected() {
        let (_, service) = service();
        assert!(matches!(
            service.initialize_driver_metrics("  ").await,
            Err(AppError::ValidationFailed(_))
        ));
    }
}
