//! Typed tool boundary
//!
//! Loosely typed JSON arguments are validated into typed inputs here, before
//! anything reaches the pipeline; results and structured failures go back
//! out as JSON text blocks.

mod handlers;
mod types;

pub use handlers::{
    available_tools, call_tool, TOOL_DECODE_POLYLINE, TOOL_ENCODE_POLYLINE,
    TOOL_GEOCODE_ADDRESS, TOOL_REVERSE_GEOCODE,
};
pub use types::{
    CallToolRequest, CallToolResponse, ContentBlock, DecodePolylineInput, DecodePolylineOutput,
    EncodePolylineInput, EncodePolylineOutput, GeocodeAddressInput, ListToolsResponse,
    ReverseGeocodeInput, ReverseGeocodeOutput, Tool,
};
