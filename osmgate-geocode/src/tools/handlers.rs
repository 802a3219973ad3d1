//! Tool definitions and dispatch

use osmgate_core::{polyline, FailureCode, ResolutionFailure};
use serde_json::{json, Value as JsonValue};
use tokio::time::Instant;

use super::types::{
    CallToolRequest, CallToolResponse, DecodePolylineInput, DecodePolylineOutput,
    EncodePolylineInput, EncodePolylineOutput, GeocodeAddressInput, ReverseGeocodeInput,
    ReverseGeocodeOutput, Tool,
};
use crate::pipeline::Geocoder;

pub const TOOL_GEOCODE_ADDRESS: &str = "geocode_address";
pub const TOOL_REVERSE_GEOCODE: &str = "reverse_geocode";
pub const TOOL_ENCODE_POLYLINE: &str = "encode_polyline";
pub const TOOL_DECODE_POLYLINE: &str = "decode_polyline";

/// Every tool this crate serves.
pub fn available_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: TOOL_GEOCODE_ADDRESS.to_string(),
            description: "Convert an address or place name to geographic coordinates".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "address": {
                        "type": "string",
                        "description": "The address or place name to geocode. Include city or country information for locations outside the US; content in parentheses is tried as an alternative name."
                    },
                    "region": {
                        "type": "string",
                        "description": "Optional region context appended to short queries (e.g. 'Chiang Rai Thailand')"
                    }
                },
                "required": ["address"]
            }),
        },
        Tool {
            name: TOOL_REVERSE_GEOCODE.to_string(),
            description: "Convert geographic coordinates to a human-readable address".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "minimum": -90,
                        "maximum": 90,
                        "description": "The latitude coordinate as a decimal between -90 and 90"
                    },
                    "longitude": {
                        "type": "number",
                        "minimum": -180,
                        "maximum": 180,
                        "description": "The longitude coordinate as a decimal between -180 and 180"
                    }
                },
                "required": ["latitude", "longitude"]
            }),
        },
        Tool {
            name: TOOL_ENCODE_POLYLINE.to_string(),
            description: "Encode a list of coordinates as a polyline string (5 decimal places)"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "points": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "latitude": { "type": "number" },
                                "longitude": { "type": "number" }
                            },
                            "required": ["latitude", "longitude"]
                        },
                        "description": "Ordered coordinates to encode"
                    }
                },
                "required": ["points"]
            }),
        },
        Tool {
            name: TOOL_DECODE_POLYLINE.to_string(),
            description: "Decode a polyline string (5 decimal places) into coordinates".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "polyline": {
                        "type": "string",
                        "description": "Encoded polyline, e.g. from a routing response"
                    }
                },
                "required": ["polyline"]
            }),
        },
    ]
}

/// Execute one tool call. Failures come back as an error response, never a panic.
pub async fn call_tool(
    geocoder: &Geocoder,
    request: CallToolRequest,
    deadline: Option<Instant>,
) -> CallToolResponse {
    tracing::debug!(tool = %request.name, "tool call");

    match execute_tool(geocoder, &request.name, &request.arguments, deadline).await {
        Ok(response) => response,
        Err(failure) => {
            tracing::info!(tool = %request.name, code = %failure.code, "tool call failed");
            CallToolResponse::failure(&failure)
        }
    }
}

async fn execute_tool(
    geocoder: &Geocoder,
    name: &str,
    args: &JsonValue,
    deadline: Option<Instant>,
) -> Result<CallToolResponse, ResolutionFailure> {
    let invalid = |err| ResolutionFailure::from_validation(&err, args.to_string());

    match name {
        TOOL_GEOCODE_ADDRESS => {
            let input = GeocodeAddressInput::from_arguments(args).map_err(invalid)?;
            let resolution = geocoder
                .resolve_address(&input.address, input.region.as_deref(), deadline)
                .await?;
            Ok(CallToolResponse::json(&resolution))
        }

        TOOL_REVERSE_GEOCODE => {
            let input = ReverseGeocodeInput::from_arguments(args).map_err(invalid)?;
            let place = geocoder
                .resolve_coordinate(input.latitude, input.longitude, deadline)
                .await?;
            Ok(CallToolResponse::json(&ReverseGeocodeOutput { place }))
        }

        TOOL_ENCODE_POLYLINE => {
            let input = EncodePolylineInput::from_arguments(args).map_err(invalid)?;
            Ok(CallToolResponse::json(&EncodePolylineOutput {
                polyline: polyline::encode(&input.points),
                point_count: input.points.len(),
            }))
        }

        TOOL_DECODE_POLYLINE => {
            let input = DecodePolylineInput::from_arguments(args).map_err(invalid)?;
            let points = polyline::decode(&input.polyline).map_err(|err| {
                ResolutionFailure::new(FailureCode::InvalidInput, err.to_string(), &input.polyline, true)
                    .with_suggestion("Check the polyline was copied whole and uses 5 decimal places of precision")
            })?;
            Ok(CallToolResponse::json(&DecodePolylineOutput { points }))
        }

        unknown => Err(ResolutionFailure::new(
            FailureCode::InvalidInput,
            format!("Unknown tool: {unknown}"),
            args.to_string(),
            true,
        )
        .with_suggestion(format!(
            "Call one of: {}",
            available_tools()
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
