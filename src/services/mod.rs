//! Service layer: business logic between the HTTP handlers and the entity
//! layer. Each service is a cheap-to-clone handle over the shared database
//! pool and the event sender.

pub mod carts;
pub mod checkout;
pub mod discounts;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod reconciliation;
pub mod shipping_rates;

use uuid::Uuid;

pub use carts::CartService;
pub use checkout::CheckoutService;
pub use discounts::DiscountService;
pub use orders::OrderService;
pub use payments::PaymentService;
pub use reconciliation::ReconciliationService;
pub use shipping_rates::ShippingRateService;

/// Who owns a cart: an authenticated customer or a guest session. Resolved
/// from request headers by the handler layer and passed down explicitly so
/// services never depend on ambient request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopperIdentity {
    Customer(Uuid),
    Guest(String),
}

impl ShopperIdentity {
    pub fn customer_id(&self) -> Option<Uuid> {
        match self {
            Self::Customer(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Customer(_) => None,
            Self::Guest(session) => Some(session),
        }
    }
}
