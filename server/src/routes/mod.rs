pub mod signup;
pub mod subscriptions;
pub mod trainings;
