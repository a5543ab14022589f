pub mod events;

#[cfg(feature = "desktop")]
pub mod progress;
