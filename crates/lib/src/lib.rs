//! Pocket core library: completion gateway client, chat emission core, session lifecycle,
//! and session persistence shared by the CLI and app front ends.

pub mod config;
pub mod conversation;
pub mod init;
pub mod llm;
pub mod session;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;
