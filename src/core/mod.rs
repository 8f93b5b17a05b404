//! Ambient infrastructure shared by the broker and the binary

pub mod error_handling;
pub mod logging;
pub mod shutdown;
pub mod sync;
pub mod time;
pub mod validation;
pub mod version;
