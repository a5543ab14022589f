pub mod nested;
pub mod password_book;

pub use nested::{extracted_dir, NestedReport, NestedScan};
