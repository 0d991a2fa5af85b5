pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod message;
pub mod pool;
pub mod proxy;
pub mod time;
pub mod upstream;

#[cfg(test)]
mod tests;
