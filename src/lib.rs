pub mod artifact;
pub mod build;
pub mod config;
pub mod coverage;
pub mod error;
pub mod geo;
pub mod normalize;
pub mod qa;
pub mod table;
