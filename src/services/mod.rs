// Leaf services
pub mod inventory;
pub mod order_status;
pub mod payment_gateway;
pub mod promotions;

// Order orchestration on top of the leaf services
pub mod orders;

pub use inventory::{InventoryLedger, ReservationLine};
pub use order_status::StatusTransitionGuard;
pub use orders::{
    CallbackReport, CreateOrderRequest, CreateOrderResponse, OrderLineRequest,
    OrderOrchestrator, OrderView,
};
pub use payment_gateway::{PaymentCallbackVerifier, VerificationOutcome};
pub use promotions::{DiscountRule, PromotionEngine};
