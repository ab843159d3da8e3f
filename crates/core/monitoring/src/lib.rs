//! Logging setup shared by the `mockdb` binaries and tests.

pub mod logging;
