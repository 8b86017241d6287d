//! Domain model: value objects, the transaction state machine and the ports
//! the confirmation engine talks to.

pub mod events;
pub mod ports;
pub mod transaction;
pub mod wallet;
