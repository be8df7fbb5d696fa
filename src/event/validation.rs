use super::EmergencyReport;
use std::fmt;

/// Validation errors for `emergency` payloads
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingStopId,
    BlankStopName,
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    /// Only one of `lat`/`lng` was supplied
    PartialCoordinates,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingStopId => write!(f, "stopId is required"),
            ValidationError::BlankStopName => write!(f, "stopName must not be blank"),
            ValidationError::LatitudeOutOfRange(lat) => {
                write!(f, "latitude {} outside [-90, 90]", lat)
            }
            ValidationError::LongitudeOutOfRange(lng) => {
                write!(f, "longitude {} outside [-180, 180]", lng)
            }
            ValidationError::PartialCoordinates => {
                write!(f, "lat and lng must be given together")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates an emergency report before it is fanned out.
///
/// Rules:
/// - `stopId` must be non-zero
/// - `stopName`, when present, must contain non-whitespace
/// - `lat`/`lng` come as a pair and must be finite and in range
pub fn validate_emergency(report: &EmergencyReport) -> Result<(), ValidationError> {
    if report.stop_id == 0 {
        return Err(ValidationError::MissingStopId);
    }

    if let Some(name) = &report.stop_name {
        if name.trim().is_empty() {
            return Err(ValidationError::BlankStopName);
        }
    }

    match (report.lat, report.lng) {
        (Some(lat), Some(lng)) => {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(ValidationError::LatitudeOutOfRange(lat));
            }
            if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
                return Err(ValidationError::LongitudeOutOfRange(lng));
            }
        }
        (None, None) => {}
        _ => return Err(ValidationError::PartialCoordinates),
    }

    Ok(())
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn report(lat: Option<f64>, lng: Option<f64>) -> EmergencyReport {
        EmergencyReport {
            stop_id: 3,
            stop_name: Some("Nokdong Port".to_string()),
            lat,
            lng,
            timestamp: None,
        }
    }

    #[test]
    fn test_coordinate_bounds() {
        assert!(validate_emergency(&report(Some(34.45), Some(127.11))).is_ok());
        assert!(validate_emergency(&report(Some(90.0), Some(-180.0))).is_ok());
        assert!(validate_emergency(&report(None, None)).is_ok());
        assert_eq!(
            validate_emergency(&report(Some(91.0), Some(127.0))),
            Err(ValidationError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            validate_emergency(&report(Some(34.0), Some(181.0))),
            Err(ValidationError::LongitudeOutOfRange(181.0))
        );
        assert_eq!(
            validate_emergency(&report(Some(34.0), None)),
            Err(ValidationError::PartialCoordinates)
        );
    }

    #[test]
    fn test_nan_latitude_rejected() {
        let result = validate_emergency(&report(Some(f64::NAN), Some(127.0)));
        assert!(matches!(result, Err(ValidationError::LatitudeOutOfRange(_))));
    }
}
