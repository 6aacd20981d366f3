pub mod compute;
pub mod host;
