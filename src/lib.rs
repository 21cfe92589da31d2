pub mod pickup_config;
pub mod pickup_controller;
pub mod pickup_hal;
pub mod pickup_hal_mock;
pub mod pickup_runner;
pub mod pickup_timers;
