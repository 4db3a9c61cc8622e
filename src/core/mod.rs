pub mod bootstrap;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod drafter;
pub mod gate;
pub mod jobs;
pub mod lifecycle;
pub mod llm;
pub mod memory;
pub mod settings;
pub mod stream;
pub mod terminal;
pub mod turn;

#[cfg(test)]
pub mod testing;
