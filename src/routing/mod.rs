//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at build):
//!     path template ("/user/<int:id>")
//!     → converter.rs (segment regex + typed conversion)
//!     → pattern.rs (anchored regex, parameter extractor)
//!     → table.rs (ordered routes, endpoint names)
//!
//! Incoming Request (method, path)
//!     → table.rs (first match in registration order)
//!     → Return: matched Route + PathParams, or a miss
//!       (not found / method not allowed)
//! ```
//!
//! # Design Decisions
//! - Routes compiled once per build, immutable at runtime
//! - Deterministic: specificity is registration order, nothing else
//! - A method mismatch is kept distinct from no match at all

pub mod converter;
pub mod pattern;
pub mod table;

pub use converter::{Converter, ConverterRegistry, ParamValue};
pub use pattern::{canonical_path, native_template, CompiledPattern, PathParams, PatternError};
pub use table::{
    ExecutionModel, Resolution, Route, RouteInfo, RouteKind, RouteMatch, RouteMetadata, RouteMiss, RouteOptions,
    RouteTable,
};
