//! Order model accepted by the order service.

use chrono::{DateTime, Utc};
use eda_core::environment::Clock;
use eda_core::event::{OrderCreated, OrderLine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Order validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// `customer_id` is empty.
    #[error("customer ID is required")]
    MissingCustomer,

    /// The order has no items.
    #[error("an order needs at least one item")]
    NoItems,

    /// An item has an empty product id.
    #[error("invalid product ID at item {index}")]
    InvalidProductId {
        /// Position of the item in the request
        index: usize,
    },

    /// An item has a zero quantity.
    #[error("quantity must be greater than 0 for product {product_id}")]
    InvalidQuantity {
        /// Offending product
        product_id: String,
    },

    /// The order total does not fit in 64 bits of cents.
    #[error("order total overflows")]
    TotalOverflow,
}

/// Lifecycle of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted, waiting for inventory
    Pending,
    /// Inventory reserved and customer notified
    Confirmed,
    /// Could not be fulfilled
    Failed,
    /// Cancelled by the customer
    Cancelled,
}

/// A line of an order.
///
/// Requests may give the unit price either as `unit_price_cents` or, as
/// older clients do, as a decimal `price` in currency units (`19.99`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ItemInput")]
pub struct OrderItem {
    /// Product being ordered
    pub product_id: String,
    /// Units ordered
    pub quantity: u32,
    /// Price of one unit in cents
    pub unit_price_cents: u64,
}

#[derive(Deserialize)]
struct ItemInput {
    product_id: String,
    quantity: u32,
    unit_price_cents: Option<u64>,
    price: Option<f64>,
}

impl TryFrom<ItemInput> for OrderItem {
    type Error = String;

    fn try_from(input: ItemInput) -> Result<Self, Self::Error> {
        let unit_price_cents = match (input.unit_price_cents, input.price) {
            (Some(cents), None) => cents,
            (None, Some(price)) => price_to_cents(price)?,
            (Some(_), Some(_)) => {
                return Err("give either unit_price_cents or price, not both".to_string());
            },
            (None, None) => return Err("missing field `unit_price_cents`".to_string()),
        };
        Ok(Self {
            product_id: input.product_id,
            quantity: input.quantity,
            unit_price_cents,
        })
    }
}

// Largest f64 below 2^64; anything above does not fit in u64 cents.
const MAX_CENTS: f64 = 18_446_744_073_709_549_568.0;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn price_to_cents(price: f64) -> Result<u64, String> {
    if !price.is_finite() || price < 0.0 {
        return Err(format!("invalid price {price}"));
    }
    let cents = price * 100.0;
    let rounded = cents.round();
    if (cents - rounded).abs() > 1e-6 {
        return Err(format!("price {price} has fractional cents"));
    }
    if rounded > MAX_CENTS {
        return Err(format!("price {price} is too large"));
    }
    Ok(rounded as u64)
}

/// Request body of `POST /api/v1/orders`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateOrderRequest {
    /// Ordering customer
    pub customer_id: String,
    /// Ordered lines
    pub items: Vec<OrderItem>,
}

/// An accepted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: Uuid,
    /// Ordering customer
    pub customer_id: String,
    /// Ordered lines
    pub items: Vec<OrderItem>,
    /// Sum of quantity times unit price, in cents
    pub total_cents: u64,
    /// Current status
    pub status: OrderStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validate `request` and turn it into a pending order with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns the first [`OrderError`] found in the request.
    pub fn place(request: CreateOrderRequest, clock: &dyn Clock) -> Result<Self, OrderError> {
        Self::place_with_id(request, Uuid::new_v4(), clock)
    }

    /// [`Order::place`] with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns the first [`OrderError`] found in the request.
    pub fn place_with_id(
        request: CreateOrderRequest,
        id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, OrderError> {
        if request.customer_id.trim().is_empty() {
            return Err(OrderError::MissingCustomer);
        }
        if request.items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut total_cents: u64 = 0;
        for (index, item) in request.items.iter().enumerate() {
            if item.product_id.trim().is_empty() {
                return Err(OrderError::InvalidProductId { index });
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                });
            }
            total_cents = item
                .unit_price_cents
                .checked_mul(u64::from(item.quantity))
                .and_then(|line| total_cents.checked_add(line))
                .ok_or(OrderError::TotalOverflow)?;
        }

        let now = clock.now();
        Ok(Self {
            id,
            customer_id: request.customer_id,
            items: request.items,
            total_cents,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// The `order.created` payload announcing this order.
    #[must_use]
    pub fn created_event(&self) -> OrderCreated {
        let lines = self
            .items
            .iter()
            .map(|item| {
                OrderLine::new(item.product_id.clone(), item.quantity)
                    .with_unit_price_cents(item.unit_price_cents)
            })
            .collect();

        let mut event = OrderCreated::new(self.id.to_string(), lines);
        event.customer_id = Some(self.customer_id.clone());
        event.total_cents = Some(self.total_cents);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_testing::test_clock;

    fn item(product_id: &str, quantity: u32, unit_price_cents: u64) -> OrderItem {
        OrderItem {
            product_id: product_id.to_string(),
            quantity,
            unit_price_cents,
        }
    }

    fn request(items: Vec<OrderItem>) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: "customer-1".to_string(),
            items,
        }
    }

    #[test]
    fn test_place_computes_total() {
        let clock = test_clock();
        let order = Order::place(
            request(vec![item("p1", 2, 1_999), item("p2", 1, 500)]),
            &clock,
        )
        .unwrap();

        assert_eq!(order.total_cents, 4_498);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.created_at, clock.now());
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn test_fresh_ids() {
        let clock = test_clock();
        let a = Order::place(request(vec![item("p1", 1, 1)]), &clock).unwrap();
        let b = Order::place(request(vec![item("p1", 1, 1)]), &clock).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_validation() {
        let clock = test_clock();

        let mut missing_customer = request(vec![item("p1", 1, 1)]);
        missing_customer.customer_id = "  ".to_string();
        assert_eq!(
            Order::place(missing_customer, &clock),
            Err(OrderError::MissingCustomer)
        );
        assert_eq!(
            Order::place(request(vec![]), &clock),
            Err(OrderError::NoItems)
        );
        assert_eq!(
            Order::place(request(vec![item("p1", 1, 1), item("", 1, 1)]), &clock),
            Err(OrderError::InvalidProductId { index: 1 })
        );
        assert_eq!(
            Order::place(request(vec![item("p1", 0, 1)]), &clock),
            Err(OrderError::InvalidQuantity {
                product_id: "p1".to_string()
            })
        );
        assert_eq!(
            Order::place(request(vec![item("p1", 2, u64::MAX)]), &clock),
            Err(OrderError::TotalOverflow)
        );
    }

    #[test]
    fn test_item_accepts_decimal_price() {
        let item: OrderItem = serde_json::from_value(serde_json::json!({
            "product_id": "p1",
            "quantity": 2,
            "price": 19.99
        }))
        .unwrap();
        assert_eq!(item.unit_price_cents, 1_999);

        let item: OrderItem = serde_json::from_value(serde_json::json!({
            "product_id": "p1",
            "quantity": 1,
            "price": 5
        }))
        .unwrap();
        assert_eq!(item.unit_price_cents, 500);
    }

    #[test]
    fn test_item_price_rejections() {
        for body in [
            serde_json::json!({"product_id": "p1", "quantity": 1, "price": -1.0}),
            serde_json::json!({"product_id": "p1", "quantity": 1, "price": 0.001}),
            serde_json::json!({"product_id": "p1", "quantity": 1}),
            serde_json::json!({
                "product_id": "p1", "quantity": 1, "price": 1.0, "unit_price_cents": 100
            }),
        ] {
            assert!(serde_json::from_value::<OrderItem>(body).is_err());
        }
    }

    #[test]
    fn test_item_serializes_cents() {
        let json = serde_json::to_value(item("p1", 1, 250)).unwrap();
        assert_eq!(json["unit_price_cents"], 250);
        assert!(json.get("price").is_none());
    }

    #[test]
    fn test_created_event() {
        let clock = test_clock();
        let order = Order::place(request(vec![item("p1", 3, 250)]), &clock).unwrap();
        let event = order.created_event();

        assert_eq!(event.order_id, order.id.to_string());
        assert_eq!(event.customer_id.as_deref(), Some("customer-1"));
        assert_eq!(event.total_cents, Some(750));
        assert_eq!(
            event.items,
            vec![OrderLine::new("p1", 3).with_unit_price_cents(250)]
        );
    }
}
