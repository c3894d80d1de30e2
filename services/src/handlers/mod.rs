//! Message handlers of the inventory and notification services.

pub mod inventory;
pub mod notification;

pub use inventory::InventoryHandler;
pub use notification::NotificationHandler;
