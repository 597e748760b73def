pub mod change;
pub mod error;
pub mod locator;
pub mod name;
pub mod storage;
pub mod versions;
