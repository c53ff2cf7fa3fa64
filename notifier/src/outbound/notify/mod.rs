//! Notify outbound adapters.
//!
//! This module provides a thin HTTP implementation of the
//! `EmailDeliveryProvider` port.

mod dto;
mod http_provider;

pub use http_provider::NotifyHttpProvider;
