//! Chat transports for parley.
//!
//! - **Telegram**: Bot API client and update parser
//! - **Console**: prints replies to stdout, for local runs

pub mod console;
pub mod split;
pub mod telegram;
pub mod update;

pub use console::ConsoleChannel;
pub use split::split_message;
pub use telegram::TelegramChannel;
pub use update::parse_update;
