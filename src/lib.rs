pub mod app;
pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod output;
pub mod probe;
pub mod rasterizer;
pub mod retrieve;
pub mod store;
pub mod tables;
