//! Tool protocol types and typed tool inputs/outputs

use osmgate_core::{validate_coordinates, Location, Place, ResolutionFailure, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// PROTOCOL TYPES
// ============================================================================

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: JsonValue,
}

/// List tools response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    /// Available tools
    pub tools: Vec<Tool>,
}

/// Tool call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: JsonValue,
}

/// Tool call response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    /// Content blocks
    pub content: Vec<ContentBlock>,
    /// Whether this is an error response
    #[serde(default)]
    pub is_error: bool,
}

/// Content block in tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },
}

impl CallToolResponse {
    /// Successful response carrying `value` as compact JSON text.
    pub fn json<T: Serialize>(value: &T) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()),
            }],
            is_error: false,
        }
    }

    /// Error response carrying the structured failure as JSON text.
    pub fn failure(failure: &ResolutionFailure) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: serde_json::to_string(failure)
                    .unwrap_or_else(|_| format!("ERROR: {} - {}", failure.code, failure.message)),
            }],
            is_error: true,
        }
    }

    /// Text of the first content block.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }
}

// ============================================================================
// ARGUMENT PARSING
// ============================================================================

fn ensure_object(args: &JsonValue) -> Result<(), ValidationError> {
    match args {
        JsonValue::Object(_) | JsonValue::Null => Ok(()),
        other => Err(ValidationError::InvalidValue {
            field: "arguments".to_string(),
            reason: format!("expected an object, got {}", json_type(other)),
        }),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn optional_str(args: &JsonValue, field: &str) -> Result<Option<String>, ValidationError> {
    match args.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a string, got {}", json_type(other)),
        }),
    }
}

fn required_str(args: &JsonValue, field: &str) -> Result<String, ValidationError> {
    optional_str(args, field)?.ok_or_else(|| ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    })
}

fn required_f64(args: &JsonValue, field: &str) -> Result<f64, ValidationError> {
    match args.get(field) {
        None | Some(JsonValue::Null) => Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }),
        Some(JsonValue::Number(n)) => n.as_f64().ok_or_else(|| ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "number out of range".to_string(),
        }),
        Some(other) => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a number, got {}", json_type(other)),
        }),
    }
}

// ============================================================================
// TYPED INPUTS
// ============================================================================

/// Arguments of `geocode_address`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeAddressInput {
    pub address: String,
    pub region: Option<String>,
}

impl GeocodeAddressInput {
    pub fn from_arguments(args: &JsonValue) -> Result<Self, ValidationError> {
        ensure_object(args)?;
        Ok(Self {
            address: required_str(args, "address")?,
            region: optional_str(args, "region")?,
        })
    }
}

/// Arguments of `reverse_geocode`. Range checks happen in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseGeocodeInput {
    pub latitude: f64,
    pub longitude: f64,
}

impl ReverseGeocodeInput {
    pub fn from_arguments(args: &JsonValue) -> Result<Self, ValidationError> {
        ensure_object(args)?;
        Ok(Self {
            latitude: required_f64(args, "latitude")?,
            longitude: required_f64(args, "longitude")?,
        })
    }
}

/// Arguments of `encode_polyline`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePolylineInput {
    pub points: Vec<Location>,
}

impl EncodePolylineInput {
    pub fn from_arguments(args: &JsonValue) -> Result<Self, ValidationError> {
        ensure_object(args)?;
        let raw = match args.get("points") {
            None | Some(JsonValue::Null) => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "points".to_string(),
                })
            }
            Some(raw) => raw.clone(),
        };

        let points: Vec<Location> =
            serde_json::from_value(raw).map_err(|e| ValidationError::InvalidValue {
                field: "points".to_string(),
                reason: e.to_string(),
            })?;
        for point in &points {
            validate_coordinates(point.latitude, point.longitude)?;
        }
        Ok(Self { points })
    }
}

/// Arguments of `decode_polyline`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodePolylineInput {
    pub polyline: String,
}

impl DecodePolylineInput {
    pub fn from_arguments(args: &JsonValue) -> Result<Self, ValidationError> {
        ensure_object(args)?;
        Ok(Self {
            polyline: required_str(args, "polyline")?,
        })
    }
}

// ============================================================================
// TYPED OUTPUTS
// ============================================================================

/// Output of `reverse_geocode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseGeocodeOutput {
    pub place: Place,
}

/// Output of `encode_polyline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodePolylineOutput {
    pub polyline: String,
    pub point_count: usize,
}

/// Output of `decode_polyline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodePolylineOutput {
    pub points: Vec<Location>,
}
