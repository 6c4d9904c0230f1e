//! Parsing worker pool (spec §4.A): parses raw JSON payloads into rows
//! aligned with the current schema, and infers the type tag for
//! previously-unknown keys (spec §4.F trigger).

mod json;
mod pool;

pub use json::{TimeLayouts, infer_scalar_type, row_from_json};
pub use pool::{ParsedUnit, ParserPool};
