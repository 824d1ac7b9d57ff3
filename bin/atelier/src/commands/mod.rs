pub mod relay;
pub mod sessions;
pub mod status;
