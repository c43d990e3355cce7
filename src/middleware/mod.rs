// SPDX-License-Identifier: MIT

//! Middleware modules (authentication).

pub mod iap;

pub use iap::{require_iap, IapUser};
