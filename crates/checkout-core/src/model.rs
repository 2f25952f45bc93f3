//! Domain Models
//!
//! Purchasable line items and the purchase context that feeds one checkout.
//! Uses `rust_decimal` for all monetary values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cart::Cart;
use crate::error::{CheckoutError, Result};
use crate::pricing::SkippedItem;

/// Reference to the thing being bought
///
/// Serialized flattened into its parent, so a service line carries
/// `"service_uid": "..."` and so on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemRef {
    #[serde(rename = "service_uid")]
    Service(String),

    #[serde(rename = "expertise_uid")]
    Expertise(String),

    #[serde(rename = "wish_response_uid")]
    WishResponse(String),
}

impl ItemRef {
    pub fn id(&self) -> &str {
        match self {
            ItemRef::Service(id) | ItemRef::Expertise(id) | ItemRef::WishResponse(id) => id,
        }
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// One purchasable entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// What is being bought
    #[serde(flatten)]
    pub item: ItemRef,

    /// Price per unit
    pub unit_cost: Decimal,

    /// Amount owed per unit to a recommender or responder, independent of price
    #[serde(default)]
    pub unit_bounty: Decimal,

    /// Units (at least 1)
    pub quantity: u32,

    /// Owning business or profile
    pub owner_id: String,

    /// Who is owed the bounty, if anyone
    #[serde(default)]
    pub recommender_id: Option<String>,
}

impl LineItem {
    pub fn new(item: ItemRef, unit_cost: Decimal, quantity: u32, owner_id: impl Into<String>) -> Self {
        Self {
            item,
            unit_cost,
            unit_bounty: Decimal::ZERO,
            quantity,
            owner_id: owner_id.into(),
            recommender_id: None,
        }
    }

    pub fn with_bounty(mut self, unit_bounty: Decimal, recommender_id: Option<String>) -> Self {
        self.unit_bounty = unit_bounty;
        self.recommender_id = recommender_id;
        self
    }

    /// Check the data-model invariants: quantity >= 1, non-negative amounts
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.quantity == 0 {
            return Err("quantity must be at least 1".into());
        }
        if self.unit_cost.is_sign_negative() {
            return Err(format!("negative unit cost {}", self.unit_cost));
        }
        if self.unit_bounty.is_sign_negative() {
            return Err(format!("negative bounty {}", self.unit_bounty));
        }
        Ok(())
    }
}

/// Who receives the money
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Seller {
    Business(String),
    Profile(String),
}

impl Seller {
    pub fn id(&self) -> &str {
        match self {
            Seller::Business(id) | Seller::Profile(id) => id,
        }
    }
}

/// Client execution environment, chosen once at construction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Embedded native payment sheet, no surcharge
    Native,
    /// Browser-hosted card entry modal, carries the processing fee
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Native => "native",
            Platform::Web => "web",
        }
    }

    /// Only the web card-entry path is surcharged
    pub fn applies_fee(&self) -> bool {
        matches!(self, Platform::Web)
    }
}

impl std::str::FromStr for Platform {
    type Err = CheckoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "native" | "ios" | "android" => Ok(Platform::Native),
            "web" => Ok(Platform::Web),
            other => Err(CheckoutError::Config(format!("unknown platform '{other}'"))),
        }
    }
}

/// Gateway reference for a captured payment (the payment intent id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ties a purchase back to the cart it was built from, so the cart can be
/// cleared once the transaction is recorded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartBinding {
    pub cart_id: String,
    pub business_ids: Vec<String>,
}

/// Everything one checkout needs, regardless of which screen started it
#[derive(Clone, Debug)]
pub struct PurchaseContext {
    pub buyer_id: String,
    pub seller: Seller,
    pub items: Vec<LineItem>,

    /// Nothing is charged; the transaction is recorded without a payment reference
    pub zero_cost: bool,

    /// Name shown on the card / billing details
    pub billing_name: String,

    /// Set when the purchase came from the local cart
    pub cart: Option<CartBinding>,

    /// Items dropped while loading the cart
    pub rejected: Vec<SkippedItem>,
}

impl PurchaseContext {
    /// Checkout of everything in the buyer's cart
    ///
    /// A cart spanning several businesses ("buy from everywhere") is recorded
    /// against its first business in key order.
    pub fn from_cart(cart: &Cart, billing_name: impl Into<String>) -> Result<Self> {
        let business_ids = cart.business_ids();
        let representative = business_ids
            .first()
            .cloned()
            .ok_or_else(|| CheckoutError::EmptyPurchase(format!("cart {} is empty", cart.id())))?;

        if business_ids.len() > 1 {
            tracing::debug!(
                cart_id = %cart.id(),
                businesses = business_ids.len(),
                representative = %representative,
                "Aggregated cart spans several businesses"
            );
        }

        Ok(Self {
            buyer_id: cart.buyer_id().to_string(),
            seller: Seller::Business(representative),
            items: cart.items(),
            zero_cost: false,
            billing_name: billing_name.into(),
            cart: Some(CartBinding {
                cart_id: cart.id().to_string(),
                business_ids,
            }),
            rejected: cart.rejected().to_vec(),
        })
    }

    /// Single paid expertise listing bought from a profile
    pub fn expertise(
        buyer_id: impl Into<String>,
        billing_name: impl Into<String>,
        expert_profile_id: impl Into<String>,
        expertise_id: impl Into<String>,
        cost: Decimal,
        quantity: u32,
    ) -> Self {
        let expert_profile_id = expert_profile_id.into();
        let item = LineItem::new(
            ItemRef::Expertise(expertise_id.into()),
            cost,
            quantity,
            expert_profile_id.clone(),
        );
        Self {
            buyer_id: buyer_id.into(),
            seller: Seller::Profile(expert_profile_id),
            items: vec![item],
            zero_cost: cost.is_zero(),
            billing_name: billing_name.into(),
            cart: None,
            rejected: Vec::new(),
        }
    }

    /// Accepting a response to a wish; no money moves, the bounty is owed to the responder
    pub fn wish_response(
        buyer_id: impl Into<String>,
        responder_profile_id: impl Into<String>,
        wish_response_id: impl Into<String>,
        bounty: Decimal,
    ) -> Self {
        let responder = responder_profile_id.into();
        let item = LineItem::new(
            ItemRef::WishResponse(wish_response_id.into()),
            Decimal::ZERO,
            1,
            responder.clone(),
        )
        .with_bounty(bounty, Some(responder.clone()));

        Self {
            buyer_id: buyer_id.into(),
            seller: Seller::Profile(responder),
            items: vec![item],
            zero_cost: true,
            billing_name: String::new(),
            cart: None,
            rejected: Vec::new(),
        }
    }

    pub fn cart_id(&self) -> Option<&str> {
        self.cart.as_ref().map(|c| c.cart_id.as_str())
    }
}
