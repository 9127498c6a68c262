pub mod capture;
pub mod camera;
pub mod aggregator;
pub mod console;
