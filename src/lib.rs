pub mod api;
pub mod config;
pub mod state;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;
