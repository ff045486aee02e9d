pub mod hub;

pub use hub::{Channel, ConnectionCounts, ConnectionGuard, Filter, Notification, NotificationHub, Subscription};
