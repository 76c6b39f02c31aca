pub mod attendance;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod reports;
pub mod sessions;
pub mod students;
