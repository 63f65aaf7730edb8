pub mod catalog;
pub mod collection;

pub use collection::{Collection, RawScan, RawSlice};
