//! Wire types for the Rezdy pickup list endpoint.

use pickup_core::PickupRecord;
use serde::Deserialize;

/// `GET /products/{productCode}/pickups` response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RezdyPickupsResponse {
    pub request_status: RequestStatus,
    #[serde(default)]
    pub pickup_locations: Vec<RezdyPickupLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub success: bool,
    #[serde(default)]
    pub error: Option<RequestError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RequestStatus {
    /// Human-readable failure reason for an unsuccessful envelope.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match &self.error {
            Some(RequestError {
                error_code: Some(code),
                error_message: Some(message),
            }) => format!("{code}: {message}"),
            Some(RequestError {
                error_message: Some(message),
                ..
            }) => message.clone(),
            Some(RequestError {
                error_code: Some(code),
                ..
            }) => code.clone(),
            _ => "request unsuccessful".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RezdyPickupLocation {
    pub location_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub minutes_prior: Option<i64>,
    #[serde(default)]
    pub additional_instructions: Option<String>,
}

impl From<RezdyPickupLocation> for PickupRecord {
    fn from(loc: RezdyPickupLocation) -> Self {
        let blank_to_none = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        PickupRecord {
            location_name: loc.location_name.trim().to_string(),
            address: blank_to_none(loc.address),
            latitude: loc.latitude,
            longitude: loc.longitude,
            minutes_prior_to_departure: loc.minutes_prior,
            additional_instructions: blank_to_none(loc.additional_instructions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_with_unknown_fields() {
        let body = serde_json::json!({
            "requestStatus": { "success": true, "version": "v1" },
            "pickupLocations": [{
                "locationName": " Mt Tamborine Visitor Centre ",
                "address": "",
                "minutesPrior": 15,
                "pickupTime": "07:45"
            }]
        });
        let parsed: RezdyPickupsResponse = serde_json::from_value(body).unwrap();
        assert!(parsed.request_status.success);

        let record: PickupRecord = parsed.pickup_locations.into_iter().next().unwrap().into();
        assert_eq!(record.location_name, "Mt Tamborine Visitor Centre");
        assert_eq!(record.address, None);
        assert_eq!(record.minutes_prior_to_departure, Some(15));
    }

    #[test]
    fn missing_pickup_list_is_empty() {
        let body = serde_json::json!({ "requestStatus": { "success": true } });
        let parsed: RezdyPickupsResponse = serde_json::from_value(body).unwrap();
        assert!(parsed.pickup_locations.is_empty());
    }

    #[test]
    fn failure_message_prefers_code_and_message() {
        let status: RequestStatus = serde_json::from_value(serde_json::json!({
            "success": false,
            "error": { "errorCode": "10", "errorMessage": "Invalid API key" }
        }))
        .unwrap();
        assert_eq!(status.failure_message(), "10: Invalid API key");

        let bare: RequestStatus =
            serde_json::from_value(serde_json::json!({ "success": false })).unwrap();
        assert_eq!(bare.failure_message(), "request unsuccessful");
    }
}
