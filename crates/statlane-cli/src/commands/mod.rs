pub mod admin;
pub mod init;
pub mod messages;
pub mod query;
pub mod sync;
