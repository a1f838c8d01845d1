// src/models/driver.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Available, // Ready to accept a transport request
    Busy,      // Currently on a trip
    Offline,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::Busy => "busy",
            DriverStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(DriverStatus::Available),
            "busy" => Ok(DriverStatus::Busy),
            "offline" => Ok(DriverStatus::Offline),
            other => Err(format!("unknown driver status: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub vehicle: String,
    pub photo: String,
    pub wheelchair_certified: bool,
    pub rating: f64, // Public average rating (0-5)
    pub coordinates: Coordinates,
    pub status: DriverStatus,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Driver {
    /// Flattens the profile into `driver:<id>` hash fields.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.clone()),
            ("name".to_string(), self.name.clone()),
            ("vehicle".to_string(), self.vehicle.clone()),
            ("photo".to_string(), self.photo.clone()),
            ("wheelchairCertified".to_string(), self.wheelchair_certified.to_string()),
            ("rating".to_string(), format!("{:.1}", self.rating)),
            ("lat".to_string(), self.coordinates.lat.to_string()),
            ("lng".to_string(), self.coordinates.lng.to_string()),
            ("status".to_string(), self.status.to_string()),
            ("lastUpdated".to_string(), self.last_updated.to_rfc3339()),
        ]
    }

    /// Rebuilds a profile from its hash. A hash without an `id` is not a driver.
    pub fn from_fields(raw: &HashMap<String, String>) -> Option<Self> {
        let id = raw.get("id").filter(|id| !id.is_empty())?.clone();
        let text = |field: &str| raw.get(field).cloned().unwrap_or_default();
        let number = |field: &str| raw.get(field).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);

        Some(Self {
            id,
            name: text("name"),
            vehicle: text("vehicle"),
            photo: text("photo"),
            wheelchair_certified: raw.get("wheelchairCertified").is_some_and(|v| v == "true"),
            rating: number("rating"),
            coordinates: Coordinates {
                lat: number("lat"),
                lng: number("lng"),
            },
            status: raw
                .get("status")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DriverStatus::Offline),
            last_updated: raw
                .get("lastUpdated")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}
