pub mod arbitrage_engine;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod feed_server;
pub mod line_grouper;
pub mod market_fetcher;
pub mod market_scanner;
pub mod normalization;
pub mod poller;
pub mod shared_types;
pub mod stake_allocator;
