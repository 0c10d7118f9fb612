//! Utilities Module - shared infrastructure
//!
//! - `call_site`: cheap source-location capture for mutation diagnostics
//! - `constants`: centralized names and limits

mod call_site;
pub mod constants;

pub use call_site::CallSite;
