pub mod auth;
pub mod bills;
pub mod clock;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod format;
pub mod identity;
pub mod interception;
pub mod models;
pub mod months;
pub mod normalize;
pub mod planner;
pub mod portal;
pub mod run_state;
pub mod sink;
