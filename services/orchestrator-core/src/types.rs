//! Core data model. See the component modules for the operations that
//! create and mutate these types.

use chrono::{DateTime, Utc};
use orchestrator_common::ids::{OrderId, ProductId, RetailerId, VendorId};
use orchestrator_common::money::Money;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetailerStatus {
    Active,
    Blocked,
    PendingApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScoreCategory {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ScoreCategory {
    #[must_use]
    pub const fn from_credit_score(score: i32) -> Self {
        match score {
            s if s < 450 => Self::VeryPoor,
            s if s < 600 => Self::Poor,
            s if s < 700 => Self::Fair,
            s if s < 800 => Self::Good,
            _ => Self::Excellent,
        }
    }

    /// Maximum single-order amount this category may place at all.
    #[must_use]
    pub const fn max_order_amount(self) -> Money {
        match self {
            Self::VeryPoor => Money::from_minor(0),
            Self::Poor => Money::new(25_000, 0),
            Self::Fair => Money::new(75_000, 0),
            Self::Good => Money::new(250_000, 0),
            Self::Excellent => Money::new(1_000_000, 0),
        }
    }

    /// Above this amount, orders from POOR/FAIR categories need manual approval.
    #[must_use]
    pub const fn approval_threshold(self) -> Money {
        match self {
            Self::Poor => Money::new(10_000, 0),
            Self::Fair => Money::new(40_000, 0),
            _ => Money::new(1_000_000_000, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retailer {
    pub id: RetailerId,
    pub phone: String,
    pub credit_limit: Money,
    pub outstanding_debt: Money,
    pub credit_score: i32,
    pub status: RetailerStatus,
}

impl Retailer {
    #[must_use]
    pub const fn score_category(&self) -> ScoreCategory {
        ScoreCategory::from_credit_score(self.credit_score)
    }

    #[must_use]
    pub fn available_credit(&self) -> Money {
        self.credit_limit - self.outstanding_debt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Kg,
    G,
    L,
    Ml,
    Piece,
    Dozen,
    Packet,
    Carton,
}

#[derive(Debug, Clone)]
pub struct VendorProductOffer {
    pub product_id: ProductId,
    pub stock: i64,
    pub unit_price: Money,
}

#[derive(Debug, Clone)]
pub struct Vendor {
    pub id: VendorId,
    pub offers: Vec<VendorProductOffer>,
    pub working_hours_start: u8,
    pub working_hours_end: u8,
    pub is_active: bool,
    pub active_orders_count: i64,
    pub pending_orders_count: i64,
}

impl Vendor {
    #[must_use]
    pub fn offer_for(&self, product_id: ProductId) -> Option<&VendorProductOffer> {
        self.offers.iter().find(|o| o.product_id == product_id)
    }
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub unit: Unit,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

impl OrderItem {
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.unit_price.mul_qty(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Draft,
    Confirmed,
    VendorAssigned,
    Accepted,
    Dispatched,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// The legal-transitions table from the order state machine design.
    #[must_use]
    pub const fn allowed_next(self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Confirmed, Self::Cancelled],
            Self::Confirmed => &[Self::VendorAssigned, Self::Cancelled],
            Self::VendorAssigned => &[Self::Accepted, Self::Cancelled],
            Self::Accepted => &[Self::Dispatched, Self::Cancelled],
            Self::Dispatched => &[Self::Delivered, Self::Cancelled],
            Self::Delivered => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSource {
    Text,
    Image,
    Manual,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub retailer_id: RetailerId,
    pub vendor_id: Option<VendorId>,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub source: OrderSource,
    pub requires_approval: bool,
    pub needs_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub fn total(&self) -> Money {
        self.items.iter().map(OrderItem::subtotal).sum()
    }

    /// Quantity of `product_id` across this order's line items. Orders are
    /// fulfilled by a single vendor, so dispatch selects on the order's
    /// primary product; this is the quantity that vendor needs in stock.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> i64 {
        self.items.iter().filter(|i| i.product_id == product_id).map(|i| i.quantity).sum()
    }
}

#[derive(Debug, Clone)]
pub struct OrderStatusLogEntry {
    pub order_id: OrderId,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryType {
    OrderCredit,
    PaymentDebit,
    RefundDebit,
    Adjustment,
}

impl LedgerEntryType {
    /// Sign applied to the entry amount when folding into the running balance.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::OrderCredit | Self::Adjustment => 1,
            Self::PaymentDebit | Self::RefundDebit => -1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: orchestrator_common::ids::LedgerEntryId,
    pub retailer_id: RetailerId,
    pub ledger_number: i64,
    pub order_id: Option<OrderId>,
    pub entry_type: LedgerEntryType,
    pub amount: Money,
    pub previous_balance: Money,
    pub running_balance: Money,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionDecision {
    Accept,
    NeedsApproval,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorScoreEventKind {
    Assigned,
    Accepted,
    Rejected,
    Delivered,
    Cancelled,
    LateResponse,
    DeliveryFailed,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorTier {
    Excellent,
    Good,
    Average,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorScoreSnapshot {
    pub vendor_id: VendorId,
    pub response_speed: i64,
    pub acceptance_rate: i64,
    pub price_competitiveness: i64,
    pub delivery_success: i64,
    pub cancellation_rate: i64,
    pub overall: i64,
    pub tier: VendorTier,
    pub computed_at: DateTime<Utc>,
}

impl VendorScoreSnapshot {
    #[must_use]
    pub const fn tier_for(overall: i64) -> VendorTier {
        match overall {
            o if o >= 90 => VendorTier::Excellent,
            o if o >= 75 => VendorTier::Good,
            o if o >= 50 => VendorTier::Average,
            _ => VendorTier::Poor,
        }
    }
}
