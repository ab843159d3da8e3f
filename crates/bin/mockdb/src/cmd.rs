pub mod provision;
pub mod resolve;
pub mod truncate;
