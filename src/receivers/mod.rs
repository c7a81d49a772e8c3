// SPDX-License-Identifier: Apache-2.0

pub mod file_tail;
pub mod output;
pub mod scrape;
