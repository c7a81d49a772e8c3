// SPDX-License-Identifier: Apache-2.0

pub mod debug_file;
pub mod http;
pub mod log;
