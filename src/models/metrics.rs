// src/models/metrics.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of completions kept in a driver's trip history.
pub const HISTORY_CAPACITY: usize = 100;

/// Default page size for history reads.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Hash field names under `driver:<id>:metrics`.
pub mod fields {
    pub const COMPLETED_TRIPS: &str = "completedTrips";
    pub const CANCELLED_TRIPS: &str = "cancelledTrips";
    pub const ON_TIME_TRIPS: &str = "onTimeTrips";
    pub const TOTAL_RATINGS: &str = "totalRatings";
    pub const RATING_SUM: &str = "ratingSum";
    pub const ON_TIME_PERCENTAGE: &str = "onTimePercentage";
    pub const ACCEPTANCE_RATE: &str = "acceptanceRate";
    pub const WHEELCHAIR_TRIPS_COMPLETED: &str = "wheelchairTripsCompleted";
    pub const AVERAGE_RESPONSE_TIME: &str = "averageResponseTime";
    pub const LAST_UPDATED: &str = "lastUpdated";

    // Raw counters behind the derived acceptance and response figures
    pub const OFFERS_RECEIVED: &str = "offersReceived";
    pub const OFFERS_ACCEPTED: &str = "offersAccepted";
    pub const RESPONSE_TIME_TOTAL: &str = "responseTimeTotal";
    pub const RESPONSE_COUNT: &str = "responseCount";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverMetrics {
    pub completed_trips: u64,
    pub cancelled_trips: u64,
    pub on_time_trips: u64,
    pub total_ratings: u64,
    pub rating_sum: f64,
    pub on_time_percentage: f64,
    pub acceptance_rate: f64,
    pub wheelchair_trips_completed: u64,
    pub average_response_time: f64, // seconds
    pub last_updated: Option<DateTime<Utc>>,
}

impl DriverMetrics {
    /// Fields written when a driver's metrics record is first created.
    /// The two percentages start at 100 as an optimistic prior.
    pub fn initial_fields(now: DateTime<Utc>) -> Vec<(String, String)> {
        [
            (fields::COMPLETED_TRIPS, "0".to_string()),
            (fields::CANCELLED_TRIPS, "0".to_string()),
            (fields::ON_TIME_TRIPS, "0".to_string()),
            (fields::TOTAL_RATINGS, "0".to_string()),
            (fields::RATING_SUM, "0".to_string()),
            (fields::ON_TIME_PERCENTAGE, "100".to_string()),
            (fields::ACCEPTANCE_RATE, "100".to_string()),
            (fields::WHEELCHAIR_TRIPS_COMPLETED, "0".to_string()),
            (fields::AVERAGE_RESPONSE_TIME, "0".to_string()),
            (fields::LAST_UPDATED, now.to_rfc3339()),
        ]
        .into_iter()
        .map(|(field, value)| (field.to_string(), value))
        .collect()
    }

    /// Builds a snapshot from raw hash fields. Percentages and averages are
    /// derived from the counters whenever their denominator is non-zero.
    pub fn from_fields(raw: &HashMap<String, String>) -> Self {
        let completed_trips = parse_count(raw, fields::COMPLETED_TRIPS);
        let on_time_trips = parse_count(raw, fields::ON_TIME_TRIPS);
        let offers_received = parse_count(raw, fields::OFFERS_RECEIVED);
        let offers_accepted = parse_count(raw, fields::OFFERS_ACCEPTED);
        let response_count = parse_count(raw, fields::RESPONSE_COUNT);

        let on_time_percentage = if completed_trips > 0 {
            100.0 * on_time_trips as f64 / completed_trips as f64
        } else {
            parse_number(raw, fields::ON_TIME_PERCENTAGE)
        };

        let acceptance_rate = if offers_received > 0 {
            100.0 * offers_accepted as f64 / offers_received as f64
        } else {
            parse_number(raw, fields::ACCEPTANCE_RATE)
        };

        let average_response_time = if response_count > 0 {
            parse_number(raw, fields::RESPONSE_TIME_TOTAL) / response_count as f64
        } else {
            parse_number(raw, fields::AVERAGE_RESPONSE_TIME)
        };

        let last_updated = raw.get(fields::LAST_UPDATED).and_then(|value| {
            match DateTime::parse_from_rfc3339(value) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(e) => {
                    tracing::warn!("Ignoring malformed {}: {} ({})", fields::LAST_UPDATED, value, e);
                    None
                }
            }
        });

        Self {
            completed_trips,
            cancelled_trips: parse_count(raw, fields::CANCELLED_TRIPS),
            on_time_trips,
            total_ratings: parse_count(raw, fields::TOTAL_RATINGS),
            rating_sum: parse_number(raw, fields::RATING_SUM),
            on_time_percentage,
            acceptance_rate,
            wheelchair_trips_completed: parse_count(raw, fields::WHEELCHAIR_TRIPS_COMPLETED),
            average_response_time,
            last_updated,
        }
    }

    /// Mean patient rating rounded to one decimal, if any rating exists.
    pub fn average_rating(&self) -> Option<f64> {
        if self.total_ratings == 0 {
            return None;
        }
        Some(round_to(self.rating_sum / self.total_ratings as f64, 1))
    }

    /// Weighted composite in [0, 1] for well-formed inputs, rounded to 4 decimals.
    pub fn composite_score(&self, weights: &ScoreWeights) -> f64 {
        // No ratings yet contributes nothing rather than 0/0
        let rating_score = if self.total_ratings == 0 {
            0.0
        } else {
            self.rating_sum / (self.total_ratings as f64 * 5.0)
        };
        let on_time_score = self.on_time_percentage / 100.0;
        let acceptance_score = self.acceptance_rate / 100.0;
        let experience_score = (self.completed_trips as f64 / 1000.0).min(1.0);
        let response_score = (1.0 - self.average_response_time / 60.0).max(0.0);

        let total = rating_score * weights.rating
            + on_time_score * weights.on_time
            + acceptance_score * weights.acceptance
            + experience_score * weights.experience
            + response_score * weights.response_time;

        round_to(total, 4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeights {
    pub rating: f64,
    pub on_time: f64,
    pub acceptance: f64,
    pub experience: f64,
    pub response_time: f64,
}

impl ScoreWeights {
    pub const STANDARD: ScoreWeights = ScoreWeights {
        rating: 0.30,
        on_time: 0.25,
        acceptance: 0.20,
        experience: 0.15,
        response_time: 0.10,
    };
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Immutable record of a finished trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripCompletion {
    pub request_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub completion_time: DateTime<Utc>,
    pub was_on_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_rating: Option<f64>, // 1-5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_feedback: Option<String>,
    #[serde(default)]
    pub wheelchair_trip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverScorecard {
    pub driver_id: String,
    pub score: f64,
    pub average_rating: Option<f64>,
    pub metrics: DriverMetrics,
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// Absent counters read as 0; malformed ones too, but loudly
fn parse_count(raw: &HashMap<String, String>, field: &str) -> u64 {
    match raw.get(field) {
        None => 0,
        Some(value) => value.parse::<u64>().unwrap_or_else(|_| {
            // Float-formatted integers ("3.0") still count
            match value.parse::<f64>() {
                Ok(number) if number.is_finite() && number >= 0.0 && number.fract() == 0.0 => number as u64,
                _ => {
                    tracing::warn!("Malformed counter {}={:?}, treating as 0", field, value);
                    0
                }
            }
        }),
    }
}

fn parse_number(raw: &HashMap<String, String>, field: &str) -> f64 {
    match raw.get(field) {
        None => 0.0,
        Some(value) => match value.parse::<f64>() {
            Ok(number) if number.is_finite() => number,
            _ => {
                tracing::warn!("Malformed number {}={:?}, treating as 0", field, value);
                0.0
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(items: &[(&str, &str)]) -> HashMap<String, String> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_absent_fields_default_to_zero() {
        let metrics = DriverMetrics::from_fields(&HashMap::new());
        assert_eq!(metrics.completed_trips, 0);
        assert_eq!(metrics.on_time_percentage, 0.0);
        assert_eq!(metrics.acceptance_rate, 0.0);
        assert_eq!(metrics.last_updated, None);
    }

    #[test]
    fn test_seeded_priors_survive_until_data_arrives() {
        let fields = DriverMetrics::initial_fields(Utc::now()).into_iter().collect::<HashMap<_, _>>();
        let metrics = DriverMetrics::from_fields(&fields);
        assert_eq!(metrics.on_time_percentage, 100.0);
        assert_eq!(metrics.acceptance_rate, 100.0);
        assert!(metrics.last_updated.is_some());
    }

    #[test]
    fn test_percentages_derived_from_counters() {
        let metrics = DriverMetrics::from_fields(&raw(&[
            (fields::COMPLETED_TRIPS, "10"),
            (fields::ON_TIME_TRIPS, "8"),
            (fields::ON_TIME_PERCENTAGE, "100"),
            (fields::OFFERS_RECEIVED, "4"),
            (fields::OFFERS_ACCEPTED, "3"),
            (fields::RESPONSE_TIME_TOTAL, "90"),
            (fields::RESPONSE_COUNT, "3"),
        ]));
        assert_eq!(metrics.on_time_percentage, 80.0);
        assert_eq!(metrics.acceptance_rate, 75.0);
        assert_eq!(metrics.average_response_time, 30.0);
    }

    #[test]
    fn test_malformed_values_parse_as_zero() {
        let metrics = DriverMetrics::from_fields(&raw(&[
            (fields::COMPLETED_TRIPS, "lots"),
            (fields::RATING_SUM, "NaN"),
            (fields::TOTAL_RATINGS, "2.0"),
            (fields::LAST_UPDATED, "yesterday"),
        ]));
        assert_eq!(metrics.completed_trips, 0);
        assert_eq!(metrics.rating_sum, 0.0);
        assert_eq!(metrics.total_ratings, 2);
        assert_eq!(metrics.last_updated, None);
    }

    #[test]
    fn test_score_for_fresh_driver() {
        let fields = DriverMetrics::initial_fields(Utc::now()).into_iter().collect::<HashMap<_, _>>();
        let metrics = DriverMetrics::from_fields(&fields);
        // 0.25 on-time + 0.20 acceptance + 0.10 response
        assert_eq!(metrics.composite_score(&ScoreWeights::STANDARD), 0.55);
    }

    #[test]
    fn test_score_for_unknown_driver() {
        let metrics = DriverMetrics::from_fields(&HashMap::new());
        assert_eq!(metrics.composite_score(&ScoreWeights::STANDARD), 0.1);
    }

    #[test]
    fn test_score_for_perfect_veteran() {
        let metrics = DriverMetrics::from_fields(&raw(&[
            (fields::COMPLETED_TRIPS, "2000"),
            (fields::ON_TIME_TRIPS, "2000"),
            (fields::TOTAL_RATINGS, "10"),
            (fields::RATING_SUM, "50"),
            (fields::ACCEPTANCE_RATE, "100"),
        ]));
        assert_eq!(metrics.composite_score(&ScoreWeights::STANDARD), 1.0);
    }

    #[test]
    fn test_score_bounds() {
        let worst = DriverMetrics::from_fields(&raw(&[
            (fields::COMPLETED_TRIPS, "10"),
            (fields::ON_TIME_TRIPS, "0"),
            (fields::TOTAL_RATINGS, "10"),
            (fields::RATING_SUM, "10"),
            (fields::AVERAGE_RESPONSE_TIME, "600"),
        ]));
        let score = worst.composite_score(&ScoreWeights::STANDARD);
        assert!((0.0..=1.0).contains(&score));
        // 0.30 * (10 / 50) + 0.15 * 0.01
        assert_eq!(score, 0.0615);
    }

    #[test]
    fn test_average_rating() {
        let metrics = DriverMetrics::from_fields(&raw(&[
            (fields::TOTAL_RATINGS, "3"),
            (fields::RATING_SUM, "13"),
        ]));
        assert_eq!(metrics.average_rating(), Some(4.3));
        assert_eq!(DriverMetrics::from_fields(&HashMap::new()).average_rating(), None);
    }

    #[test]
    fn test_trip_completion_wire_format() {
        let json = r#"{
            "requestId": "req-1",
            "scheduledTime": "2025-01-01T10:00:00Z",
            "completionTime": "2025-01-01T10:20:00Z",
            "wasOnTime": true,
            "patientRating": 5
        }"#;
        let completion: TripCompletion = serde_json::from_str(json).unwrap();
        assert_eq!(completion.patient_rating, Some(5.0));
        assert!(!completion.wheelchair_trip);

        let value = serde_json::to_value(&completion).unwrap();
        assert_eq!(value["requestId"], "req-1");
        assert!(value.get("patientFeedback").is_none());
    }
}
