// shop/src/web/handlers/mod.rs

pub mod callback_handlers;
pub mod payment_handlers;
