pub mod config;
pub mod conversation;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod grid;
pub mod history;
pub mod registry;
pub mod safe_mode;
pub mod schema;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
