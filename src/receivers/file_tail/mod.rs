// SPDX-License-Identifier: Apache-2.0

//! Follows a single log file, resuming from a persisted byte offset.

pub mod checkpoint;
pub mod config;
mod decoder;
pub mod error;
mod rate;
pub mod receiver;

pub use config::FileTailConfig;
pub use receiver::FileTailReceiver;
