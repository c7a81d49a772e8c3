// SPDX-License-Identifier: Apache-2.0

//! Scrapes a plain-text metrics exposition endpoint on an interval.

pub mod config;
pub mod parser;
pub mod receiver;

pub use config::ScrapeConfig;
pub use receiver::{ScrapeError, ScrapeReceiver};
