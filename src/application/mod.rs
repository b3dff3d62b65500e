//! Application services: the API client and the widgets built on it.

pub mod client;
pub mod dashboard;
pub mod diary;
pub mod error;
pub mod fasting;
pub mod optimistic;
pub mod refresh;
pub mod relay;
pub mod reminders;
pub mod water;

#[cfg(test)]
pub(crate) mod test_support;
