pub mod actors;
pub mod services;
