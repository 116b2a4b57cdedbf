// SPDX-License-Identifier: Apache-2.0

pub mod listener;
pub mod query;
pub mod receivers;
pub mod server;
pub mod telemetry;
