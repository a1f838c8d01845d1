// src/services/mod.rs
pub mod assignment_service;
pub mod connection_hub;
pub mod data_generator;
pub mod driver_metrics_service;
pub mod marketplace_service;
pub mod store;
pub mod task_supervisor;
