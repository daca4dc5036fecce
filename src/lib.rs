pub mod api;
pub mod battle;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod http_client;
pub mod leaderboard;
pub mod match_clock;
pub mod payload;
pub mod poller;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transport;
