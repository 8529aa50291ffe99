//! Stateless repositories; every method takes `&Connection`.

pub mod directory;
pub mod notification;

pub use directory::DirectoryRepo;
pub use notification::NotificationRepo;
