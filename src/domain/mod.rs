//! Domain module
//!
//! Pure domain logic for the Spending context: value types, the two
//! aggregate roots, and the events they emit. Nothing in here touches
//! the database or the network.

pub mod authorization;
pub mod card_account;
pub mod error;
pub mod events;
pub mod ids;
pub mod money;

pub use authorization::{Authorization, AuthorizationState};
pub use card_account::CardAccount;
pub use error::{CorruptState, DomainError};
pub use events::{EventEnvelope, OutboxEntry, SpendAuthorized, SpendCaptured, SpendReversed};
pub use ids::{AuthorizationId, CardAccountId, CausationId, CorrelationId, EventId, TenantId};
pub use money::{Currency, Money, MoneyError};
