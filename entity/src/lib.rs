pub mod access_control_entries;
pub mod organizations;
pub mod sessions;
pub mod subscriptions;
pub mod trainings;
