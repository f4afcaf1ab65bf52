pub mod config;
pub mod db;
pub mod logging;
pub mod notify;
pub mod repositories;
