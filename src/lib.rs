pub mod config;
pub mod fetch;
pub mod logging;
pub mod pages;
pub mod params;
pub mod query;
pub mod schedule;
pub mod view;
