mod client;
mod config;
mod context;
mod session;
