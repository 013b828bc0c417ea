//! Domain models and the SQL that owns them.

pub mod consumers;
pub mod deliveries;
pub mod items;
pub mod requests;
pub mod subscriptions;

pub use consumers::Consumer;
pub use deliveries::{Delivery, DeliveryOrigin, DeliveryStatus, DispatchCandidate};
pub use items::{Item, ItemStatus};
pub use subscriptions::Subscription;
