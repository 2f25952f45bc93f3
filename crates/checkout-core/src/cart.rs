//! Cart Store
//!
//! The device-local cart is a key-value store: one key per business, each value a
//! JSON list of items. Checkout only reads it, and clears the business keys once a
//! transaction is recorded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::model::{ItemRef, LineItem};
use crate::pricing::SkippedItem;

/// Key-value store trait for the local cart
pub trait CartStore: Send + Sync {
    /// All business keys currently holding items
    fn keys(&self) -> Result<Vec<String>>;

    /// Raw JSON stored under a business key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the JSON under a business key
    fn put(&self, key: &str, value: String) -> Result<()>;

    /// Drop a business key
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory cart store (for development/testing)
pub struct MemoryCartStore {
    entries: RwLock<HashMap<String, String>>,
}

impl Default for MemoryCartStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl CartStore for MemoryCartStore {
    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.keys().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Item as persisted on the device
///
/// Amounts are kept as raw JSON: older app versions wrote them as strings,
/// newer ones as numbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCartItem {
    #[serde(flatten)]
    pub item: ItemRef,
    pub cost: serde_json::Value,
    #[serde(default)]
    pub bounty: Option<serde_json::Value>,
    pub quantity: u32,
    #[serde(default)]
    pub recommender_id: Option<String>,
}

impl StoredCartItem {
    fn from_line(line: &LineItem) -> Self {
        Self {
            item: line.item.clone(),
            cost: serde_json::Value::String(line.unit_cost.to_string()),
            bounty: Some(serde_json::Value::String(line.unit_bounty.to_string())),
            quantity: line.quantity,
            recommender_id: line.recommender_id.clone(),
        }
    }

    fn into_line(self, business_id: &str) -> std::result::Result<LineItem, SkippedItem> {
        let item_id = self.item.id().to_string();
        let cost = parse_amount(&self.cost).ok_or_else(|| SkippedItem {
            item_id: item_id.clone(),
            reason: format!("unparseable cost {}", self.cost),
        })?;
        let bounty = match &self.bounty {
            None | Some(serde_json::Value::Null) => Decimal::ZERO,
            Some(raw) => parse_amount(raw).ok_or_else(|| SkippedItem {
                item_id: item_id.clone(),
                reason: format!("unparseable bounty {raw}"),
            })?,
        };

        let line = LineItem::new(self.item, cost, self.quantity, business_id)
            .with_bounty(bounty, self.recommender_id);
        line.validate().map_err(|reason| SkippedItem { item_id, reason })?;
        Ok(line)
    }
}

/// Parse a non-negative amount from a JSON string or number
pub fn parse_amount(raw: &serde_json::Value) -> Option<Decimal> {
    let amount = match raw {
        serde_json::Value::String(s) => Decimal::from_str(s.trim().trim_start_matches('$')).ok()?,
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok()?,
        _ => return None,
    };
    (!amount.is_sign_negative()).then_some(amount)
}

/// A buyer's cart, grouped by business
#[derive(Clone, Debug)]
pub struct Cart {
    buyer_id: String,
    businesses: BTreeMap<String, Vec<LineItem>>,
    rejected: Vec<SkippedItem>,
    locks: Option<CartLocks>,
}

impl Cart {
    pub fn new(buyer_id: impl Into<String>) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            businesses: BTreeMap::new(),
            rejected: Vec::new(),
            locks: None,
        }
    }

    /// Build the cart from every business key in the store
    ///
    /// Items that cannot be read are collected in [`Cart::rejected`] rather than
    /// failing the whole cart.
    pub fn load(store: &dyn CartStore, buyer_id: impl Into<String>) -> Result<Self> {
        let mut cart = Self::new(buyer_id);

        for key in store.keys()? {
            let Some(raw) = store.get(&key)? else { continue };
            let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
                .map_err(|e| CheckoutError::Storage(format!("cart entry '{key}' is not a JSON list: {e}")))?;

            for value in values {
                let parsed = serde_json::from_value::<StoredCartItem>(value.clone())
                    .map_err(|e| SkippedItem {
                        item_id: item_id_hint(&value),
                        reason: format!("unreadable cart item: {e}"),
                    })
                    .and_then(|stored| stored.into_line(&key));

                match parsed {
                    Ok(line) => cart.businesses.entry(key.clone()).or_default().push(line),
                    Err(skipped) => {
                        tracing::warn!(
                            business_id = %key,
                            item_id = %skipped.item_id,
                            reason = %skipped.reason,
                            "Dropping unreadable cart item"
                        );
                        cart.rejected.push(skipped);
                    }
                }
            }
        }

        Ok(cart)
    }

    /// Refuse edits while a checkout of this cart holds its lock
    pub fn guarded_by(mut self, locks: CartLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    fn ensure_editable(&self) -> Result<()> {
        match &self.locks {
            Some(locks) => locks.ensure_editable(&self.buyer_id),
            None => Ok(()),
        }
    }

    /// Write every business list back to the store
    pub fn save(&self, store: &dyn CartStore) -> Result<()> {
        self.ensure_editable()?;
        for (business_id, lines) in &self.businesses {
            let stored: Vec<StoredCartItem> = lines.iter().map(StoredCartItem::from_line).collect();
            store.put(business_id, serde_json::to_string(&stored)?)?;
        }
        Ok(())
    }

    /// Remove the given business keys from the store
    pub fn clear(store: &dyn CartStore, business_ids: &[String]) -> Result<()> {
        for key in business_ids {
            store.remove(key)?;
        }
        Ok(())
    }

    /// Cart identity; one cart per buyer on the device
    pub fn id(&self) -> &str {
        &self.buyer_id
    }

    pub fn buyer_id(&self) -> &str {
        &self.buyer_id
    }

    pub fn business_ids(&self) -> Vec<String> {
        self.businesses.keys().cloned().collect()
    }

    /// All items, ordered by business
    pub fn items(&self) -> Vec<LineItem> {
        self.businesses.values().flatten().cloned().collect()
    }

    pub fn rejected(&self) -> &[SkippedItem] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.businesses.values().all(Vec::is_empty)
    }

    /// Add an item under its owning business
    pub fn add(&mut self, item: LineItem) -> Result<()> {
        self.ensure_editable()?;
        item.validate().map_err(|reason| {
            tracing::debug!(item_id = %item.item, %reason, "Rejected cart add");
            CheckoutError::InvalidAmount {
                item_ids: vec![item.item.id().to_string()],
            }
        })?;
        self.businesses.entry(item.owner_id.clone()).or_default().push(item);
        Ok(())
    }

    /// Set the quantity of every entry for an item; zero removes it
    pub fn set_quantity(&mut self, item: &ItemRef, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return self.remove(item);
        }
        self.ensure_editable()?;
        for lines in self.businesses.values_mut() {
            let mut first = true;
            lines.retain_mut(|line| {
                if &line.item != item {
                    return true;
                }
                if first {
                    line.quantity = quantity;
                    first = false;
                    true
                } else {
                    false
                }
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, item: &ItemRef) -> Result<()> {
        self.ensure_editable()?;
        for lines in self.businesses.values_mut() {
            lines.retain(|line| &line.item != item);
        }
        self.businesses.retain(|_, lines| !lines.is_empty());
        Ok(())
    }
}

fn item_id_hint(value: &serde_json::Value) -> String {
    ["service_uid", "expertise_uid", "wish_response_uid"]
        .iter()
        .find_map(|k| value.get(k).and_then(|v| v.as_str()))
        .unwrap_or("<unknown>")
        .to_string()
}

/// Carts with a checkout session in flight
///
/// Shared between the orchestrator and whatever edits the cart, so edits can be
/// refused while a price computed from the cart is being charged.
#[derive(Clone, Default)]
pub struct CartLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl CartLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a cart for one checkout; released when the lease drops
    pub fn try_acquire(&self, cart_id: &str) -> Result<CartLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(cart_id.to_string()) {
            return Err(CheckoutError::CartLocked(cart_id.to_string()));
        }
        Ok(CartLease {
            locks: self.clone(),
            cart_id: cart_id.to_string(),
        })
    }

    pub fn is_locked(&self, cart_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(cart_id)
    }

    /// Gate for cart edits coming from the UI
    pub fn ensure_editable(&self, cart_id: &str) -> Result<()> {
        if self.is_locked(cart_id) {
            return Err(CheckoutError::CartLocked(cart_id.to_string()));
        }
        Ok(())
    }
}

/// Held while a checkout of the cart is non-terminal
#[derive(Debug)]
pub struct CartLease {
    locks: CartLocks,
    cart_id: String,
}

impl CartLease {
    pub fn cart_id(&self) -> &str {
        &self.cart_id
    }
}

impl std::fmt::Debug for CartLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartLocks").finish_non_exhaustive()
    }
}

impl Drop for CartLease {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.cart_id);
        tracing::trace!(cart_id = %self.cart_id, "Released cart lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_tolerates_string_and_number_costs() {
        let store = MemoryCartStore::new();
        store
            .put(
                "biz-1",
                r#"[{"service_uid":"bs-1","cost":"10.00","quantity":2},
                    {"service_uid":"bs-2","cost":4.5,"bounty":"1.00","quantity":1,"recommender_id":"p-7"}]"#
                    .into(),
            )
            .unwrap();

        let cart = Cart::load(&store, "buyer-1").unwrap();
        let items = cart.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].unit_cost, dec!(10.00));
        assert_eq!(items[1].unit_cost, dec!(4.5));
        assert_eq!(items[1].unit_bounty, dec!(1.00));
        assert_eq!(items[1].recommender_id.as_deref(), Some("p-7"));
        assert!(cart.rejected().is_empty());
    }

    #[test]
    fn test_load_reports_bad_items() {
        let store = MemoryCartStore::new();
        store
            .put(
                "biz-1",
                r#"[{"service_uid":"ok","cost":"3","quantity":1},
                    {"service_uid":"bad","cost":"three","quantity":1},
                    {"service_uid":"neg","cost":-1,"quantity":1}]"#
                    .into(),
            )
            .unwrap();

        let cart = Cart::load(&store, "buyer-1").unwrap();
        assert_eq!(cart.items().len(), 1);
        let rejected: Vec<_> = cart.rejected().iter().map(|s| s.item_id.as_str()).collect();
        assert_eq!(rejected, vec!["bad", "neg"]);
    }

    #[test]
    fn test_save_and_clear() {
        let store = MemoryCartStore::new();
        let mut cart = Cart::new("buyer-1");
        cart.add(LineItem::new(ItemRef::Service("bs-1".into()), dec!(2), 1, "biz-a"))
            .unwrap();
        cart.add(LineItem::new(ItemRef::Service("bs-2".into()), dec!(3), 1, "biz-b"))
            .unwrap();
        cart.save(&store).unwrap();

        let reloaded = Cart::load(&store, "buyer-1").unwrap();
        assert_eq!(reloaded.business_ids(), vec!["biz-a", "biz-b"]);

        Cart::clear(&store, &reloaded.business_ids()).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_quantity_changes() {
        let mut cart = Cart::new("buyer-1");
        let item = ItemRef::Service("bs-1".into());
        cart.add(LineItem::new(item.clone(), dec!(2), 1, "biz-a")).unwrap();
        cart.add(LineItem::new(item.clone(), dec!(2), 1, "biz-a")).unwrap();

        cart.set_quantity(&item, 5).unwrap();
        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 5);

        cart.set_quantity(&item, 0).unwrap();
        assert!(cart.is_empty());
        assert!(cart.business_ids().is_empty());
    }

    #[test]
    fn test_guarded_cart_refuses_edits_during_checkout() {
        let store = MemoryCartStore::new();
        let locks = CartLocks::new();
        let item = ItemRef::Service("bs-1".into());
        let mut cart = Cart::new("buyer-1").guarded_by(locks.clone());
        cart.add(LineItem::new(item.clone(), dec!(2), 1, "biz-a")).unwrap();

        let lease = locks.try_acquire("buyer-1").unwrap();
        let locked = |r: Result<()>| matches!(r, Err(CheckoutError::CartLocked(_)));
        assert!(locked(cart.add(LineItem::new(item.clone(), dec!(2), 1, "biz-a"))));
        assert!(locked(cart.set_quantity(&item, 3)));
        assert!(locked(cart.remove(&item)));
        assert!(locked(cart.save(&store)));
        assert_eq!(cart.items()[0].quantity, 1);

        drop(lease);
        cart.set_quantity(&item, 3).unwrap();
        cart.save(&store).unwrap();
    }

    #[test]
    fn test_lock_released_on_drop() {
        let locks = CartLocks::new();
        let lease = locks.try_acquire("buyer-1").unwrap();
        assert!(locks.ensure_editable("buyer-1").is_err());
        assert!(matches!(locks.try_acquire("buyer-1"), Err(CheckoutError::CartLocked(_))));

        drop(lease);
        assert!(locks.ensure_editable("buyer-1").is_ok());
    }
}
