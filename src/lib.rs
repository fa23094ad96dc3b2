pub mod common;
pub mod execution;
pub mod main_entry;
pub mod storage_v2;
pub mod util;
