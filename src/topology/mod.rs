// SPDX-License-Identifier: Apache-2.0

pub mod batch;
pub mod component;
pub mod fanout;
pub mod pipeline;
pub mod registry;
pub mod supervisor;
