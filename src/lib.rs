#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub mod config;
pub mod model;
pub mod observability;
pub mod ranking;
pub mod scheduler;
pub(crate) mod util;
