pub mod chat;
pub mod compliance;
pub mod errors;
pub mod ports;
pub mod repositories;
pub mod trading;
