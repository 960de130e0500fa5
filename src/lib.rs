pub mod auto_delete;
pub mod bot;
pub mod broadcast;
pub mod channel_monitor;
pub mod config;
pub mod conversation;
pub mod fuzzy;
pub mod handlers;
pub mod metadata_parser;
pub mod migrations;
pub mod premium;
pub mod rate_limiters;
pub mod recent;
pub mod requests;
pub mod search;
pub mod statistics;
pub mod tmdb;
pub mod user_manager;
pub mod utils;
