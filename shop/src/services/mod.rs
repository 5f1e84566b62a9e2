// shop/src/services/mod.rs

pub mod clock;
pub mod expiry;
pub mod gateway;
pub mod notifications;
pub mod orders;
pub mod poller;
pub mod status;
pub mod stock;
