pub mod cell;
pub mod error;
pub mod planner;
pub mod rows;
