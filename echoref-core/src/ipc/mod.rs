//! Types a host forwards across its own process or event boundary.
//!
//! Everything here derives `serde::Serialize` + `serde::Deserialize` so a
//! host can emit it as JSON without a wrapper type.

pub mod events;
