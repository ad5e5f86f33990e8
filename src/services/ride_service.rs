// src/services/ride_service.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    ValidationError,
    errors::{RiderError, RiderResult},
    models::ride::{
        CancelRideRequest, Paginated, Ride, RideActionResponse, RideEnvelope, RideRequest, RideStatus,
        ShareResponse, SosResponse,
    },
    services::api_client::ApiClient,
};

/// What the tracking screen needs from the backend.
#[async_trait]
pub trait RideApi: Send + Sync {
    async fn fetch_ride(&self, ride_id: &str) -> RiderResult<Ride>;
    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> RiderResult<Ride>;
    /// Returns the public tracking link.
    async fn share_ride(&self, ride_id: &str) -> RiderResult<String>;
    /// Returns the backend's acknowledgment text.
    async fn send_sos(&self, ride_id: &str) -> RiderResult<String>;
}

pub struct RideService {
    api: Arc<ApiClient>,
}

impl RideService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn request_ride(&self, request: &RideRequest) -> RiderResult<RideActionResponse> {
        validate_ride_request(request)?;
        tracing::info!("Requesting ride from '{}' to '{}'", request.pickup_address, request.dropoff_address);
        let response: RideActionResponse = self.api.post(&["rides", "request"], Some(request)).await?;
        tracing::info!("Ride {} created with status {}", response.ride.id, response.ride.status);
        Ok(response)
    }

    pub async fn history(&self, status: Option<RideStatus>) -> RiderResult<Paginated<Ride>> {
        let filter = status.map(|s| s.as_str());
        let query: Vec<(&str, &str)> = filter.into_iter().map(|s| ("status", s)).collect();
        self.api.get(&["rides", "history"], &query).await
    }
}

fn ride_id_checked(ride_id: &str) -> RiderResult<&str> {
    let trimmed = ride_id.trim();
    if trimmed.is_empty() {
        return Err(RiderError::InvalidRideId(ride_id.to_string()));
    }
    Ok(trimmed)
}

/// 404 on a ride route means the ride, not the endpoint.
fn ride_scoped(ride_id: &str, err: RiderError) -> RiderError {
    match err {
        RiderError::NotFound(_) => RiderError::ride_not_found(ride_id),
        other => other,
    }
}

#[async_trait]
impl RideApi for RideService {
    async fn fetch_ride(&self, ride_id: &str) -> RiderResult<Ride> {
        let id = ride_id_checked(ride_id)?;
        tracing::debug!("Fetching ride {}", id);
        let envelope: RideEnvelope = self
            .api
            .get(&["rides", id], &[])
            .await
            .map_err(|e| ride_scoped(id, e))?;
        Ok(envelope.into_ride())
    }

    async fn cancel_ride(&self, ride_id: &str, reason: &str) -> RiderResult<Ride> {
        let id = ride_id_checked(ride_id)?;
        tracing::info!("Cancelling ride {}", id);
        let body = CancelRideRequest { cancellation_reason: reason.to_string() };
        let response: RideActionResponse = self
            .api
            .post(&["rides", id, "cancel"], Some(&body))
            .await
            .map_err(|e| ride_scoped(id, e))?;
        Ok(response.ride)
    }

    async fn share_ride(&self, ride_id: &str) -> RiderResult<String> {
        let id = ride_id_checked(ride_id)?;
        let response: ShareResponse = self
            .api
            .post::<(), _>(&["rides", id, "share"], None)
            .await
            .map_err(|e| ride_scoped(id, e))?;
        Ok(response.share_url)
    }

    async fn send_sos(&self, ride_id: &str) -> RiderResult<String> {
        let id = ride_id_checked(ride_id)?;
        tracing::warn!("SOS raised for ride {}", id);
        let response: Option<SosResponse> = self
            .api
            .post::<(), _>(&["rides", id, "sos"], None)
            .await
            .map_err(|e| ride_scoped(id, e))?;
        Ok(response
            .map(|r| r.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Emergency alert sent".to_string()))
    }
}

pub fn validate_ride_request(request: &RideRequest) -> RiderResult<()> {
    let mut errors = Vec::new();

    if request.pickup_address.trim().is_empty() {
        errors.push(ValidationError {
            field: "pickup_address".to_string(),
            message: "Pickup address is required".to_string(),
        });
    }
    if request.dropoff_address.trim().is_empty() {
        errors.push(ValidationError {
            field: "dropoff_address".to_string(),
            message: "Dropoff address is required".to_string(),
        });
    }

    let coordinate_checks = [
        ("pickup_lat", request.pickup_lat, 90.0),
        ("pickup_lng", request.pickup_lng, 180.0),
        ("dropoff_lat", request.dropoff_lat, 90.0),
        ("dropoff_lng", request.dropoff_lng, 180.0),
    ];
    for (field, value, bound) in coordinate_checks {
        if let Some(v) = value {
            if !v.is_finite() || v.abs() > bound {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("{} must be between -{} and {}", field, bound, bound),
                });
            }
        }
    }
    if request.pickup_lat.is_some() != request.pickup_lng.is_some() {
        errors.push(ValidationError {
            field: "pickup_lat".to_string(),
            message: "Pickup latitude and longitude must be given together".to_string(),
        });
    }
    if request.dropoff_lat.is_some() != request.dropoff_lng.is_some() {
        errors.push(ValidationError {
            field: "dropoff_lat".to_string(),
            message: "Dropoff latitude and longitude must be given together".to_string(),
        });
    }

    if errors.is_empty() { Ok(()) } else { Err(RiderError::ValidationFailed(errors)) }
}
