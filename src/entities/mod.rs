pub mod order;
pub mod order_detail;
pub mod payment_callback;
pub mod promotion;
pub mod stock;

pub use order::{OrderStatus, PaymentType};
pub use payment_callback::PaymentOutcome;
pub use promotion::PromotionType;
