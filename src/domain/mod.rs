//! Domain model: transactions, chains, tokens, payment methods and the ports
//! the application layer drives.

pub mod ach;
pub mod chain;
pub mod events;
pub mod identity;
pub mod money;
pub mod payment_method;
pub mod ports;
pub mod token;
pub mod transaction;
