mod client_context;
mod db;
mod errors;
mod query_result;

pub use client_context::*;
pub use db::*;
pub use errors::*;
pub use query_result::*;
