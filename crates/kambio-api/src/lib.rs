pub mod admin;
pub mod auth;
pub mod convert;
pub mod exchanges;
pub mod listings;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod rates;
pub mod ratings;
pub mod reports;
pub mod support;
pub mod users;
