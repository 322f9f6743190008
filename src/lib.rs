pub mod bus;
pub mod chat;
pub mod client;
pub mod config;
pub mod controller;
pub mod entity;
pub mod render;
pub mod store;
