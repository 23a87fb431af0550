#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

//! Exploratory analytics over medical case collections: frequency tables,
//! histograms, co-occurrence matrices, density curves, k-means clustering and
//! lasso/rectangle selection feeding back into record filtering.

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod filter;
pub mod records;
pub mod session;
pub mod structs;
