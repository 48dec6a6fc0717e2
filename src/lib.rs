//! Reconstruction of large-deviation distributions from biased Monte Carlo runs.
//!
//! Raw runs are decorrelated ([`autocorr`]), histogrammed with bootstrap
//! errors ([`histogram`], [`bootstrap`]), turned into per-window
//! log-probability curves ([`window`]), aligned ([`stitch`]) and normalized
//! ([`distribution`]). [`pipeline::Pipeline`] drives all of it from an
//! [`config::EvaluationConfig`].

pub mod autocorr;
pub mod bootstrap;
pub mod config;
pub mod distribution;
pub mod error;
pub mod histogram;
pub mod io;
pub mod pipeline;
pub mod simple;
pub mod simulator;
pub mod spline;
pub mod stitch;
pub mod window;
