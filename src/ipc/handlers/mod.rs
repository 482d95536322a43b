pub mod auth;
pub mod chapters;
pub mod core;
pub mod dashboard;
pub mod exams;
pub mod prefs;
pub mod resources;
pub mod study;
