// src/models/request.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::models::driver::Coordinates;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Available, // Open for any driver to accept
    Assigned,  // Accepted by exactly one driver
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Available => "available",
            RequestStatus::Assigned => "assigned",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(RequestStatus::Available),
            "assigned" => Ok(RequestStatus::Assigned),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum InsuranceCarrier {
    Medicare,
    BlueShield,
    Medicaid,
    Private,
}

impl InsuranceCarrier {
    pub const ALL: [InsuranceCarrier; 4] = [
        InsuranceCarrier::Medicare,
        InsuranceCarrier::BlueShield,
        InsuranceCarrier::Medicaid,
        InsuranceCarrier::Private,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsuranceCarrier::Medicare => "Medicare",
            InsuranceCarrier::BlueShield => "BlueShield",
            InsuranceCarrier::Medicaid => "Medicaid",
            InsuranceCarrier::Private => "Private",
        }
    }
}

impl FromStr for InsuranceCarrier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InsuranceCarrier::ALL
            .into_iter()
            .find(|carrier| carrier.as_str() == s)
            .ok_or_else(|| format!("unknown insurance carrier: {}", s))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportRequest {
    pub id: String,
    pub scheduled_time: DateTime<Utc>,
    pub distance: f64, // miles
    pub coordinates: Coordinates,
    pub address: String,
    pub phone: String,
    pub requires_wheelchair: bool,
    pub insurance_carrier: InsuranceCarrier,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver: Option<String>,
}

impl TransportRequest {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("scheduledTime".to_string(), self.scheduled_time.to_rfc3339()),
            ("distance".to_string(), self.distance.to_string()),
            ("lat".to_string(), self.coordinates.lat.to_string()),
            ("lng".to_string(), self.coordinates.lng.to_string()),
            ("address".to_string(), self.address.clone()),
            ("phone".to_string(), self.phone.clone()),
            ("requiresWheelchair".to_string(), self.requires_wheelchair.to_string()),
            ("insuranceCarrier".to_string(), self.insurance_carrier.as_str().to_string()),
            ("status".to_string(), self.status.to_string()),
            ("createdAt".to_string(), self.created_at.to_rfc3339()),
        ];
        if let Some(payment) = self.payment {
            fields.push(("payment".to_string(), format!("{:.2}", payment)));
        }
        if let Some(driver_id) = &self.assigned_driver {
            fields.push(("assignedDriver".to_string(), driver_id.clone()));
        }
        fields
    }

    /// Rebuilds a request from its hash. Missing `id` or an unreadable
    /// timestamp, status or carrier means the record is unusable.
    pub fn from_fields(raw: &HashMap<String, String>) -> Option<Self> {
        let id = raw.get("id").filter(|id| !id.is_empty())?.clone();
        let number = |field: &str| raw.get(field).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
        let timestamp = |field: &str| {
            raw.get(field)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|v| v.with_timezone(&Utc))
        };

        Some(Self {
            id,
            scheduled_time: timestamp("scheduledTime")?,
            distance: number("distance"),
            coordinates: Coordinates {
                lat: number("lat"),
                lng: number("lng"),
            },
            address: raw.get("address").cloned().unwrap_or_default(),
            phone: raw.get("phone").cloned().unwrap_or_default(),
            requires_wheelchair: raw.get("requiresWheelchair").is_some_and(|v| v == "true"),
            insurance_carrier: raw.get("insuranceCarrier")?.parse().ok()?,
            status: raw.get("status")?.parse().ok()?,
            created_at: timestamp("createdAt")?,
            payment: raw.get("payment").and_then(|v| v.parse::<f64>().ok()),
            assigned_driver: raw.get("assignedDriver").cloned(),
        })
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// Dashboard counters shown next to the request feed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub request_volume: u64,
    pub active_drivers: u64,
    pub nearby_drivers: u64,
}

impl DashboardMetrics {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("requestVolume".to_string(), self.request_volume.to_string()),
            ("activeDrivers".to_string(), self.active_drivers.to_string()),
            ("nearbyDrivers".to_string(), self.nearby_drivers.to_string()),
        ]
    }

    pub fn from_fields(raw: &HashMap<String, String>) -> Self {
        let count = |field: &str| raw.get(field).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        Self {
            request_volume: count("requestVolume"),
            active_drivers: count("activeDrivers"),
            nearby_drivers: count("nearbyDrivers"),
        }
    }
}
