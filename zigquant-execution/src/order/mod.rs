use crate::{error::ExecutionError, position::Position};
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use id::{ClientOrderId, FillId, OrderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use status::OrderStatus;
use std::collections::BTreeSet;
use zigquant_instrument::{Side, pair::TradingPair};

/// `Order` related identifiers.
pub mod id;

/// `Order` lifecycle [`OrderStatus`] state machine.
pub mod status;

/// Execution kind of an [`Order`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopLimit,
    Trigger,
}

impl OrderKind {
    /// Whether this kind rests at (and therefore requires) a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    /// Whether this kind activates off a trigger price.
    pub fn requires_trigger(&self) -> bool {
        matches!(self, Self::StopLimit | Self::Trigger)
    }
}

/// Time-in-force policy of an [`Order`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    /// Rest until filled or cancelled.
    GoodTilCancelled,
    /// Fill what is immediately marketable, cancel the rest.
    ImmediateOrCancel,
    /// Post-only: reject instead of taking liquidity.
    AddLiquidityOnly,
}

/// Client intent to open an order, validated before submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct OrderRequest {
    pub pair: TradingPair,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub trigger_price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Convenience constructor for a GTC limit order.
    pub fn limit(pair: TradingPair, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            pair,
            side,
            kind: OrderKind::Limit,
            time_in_force: TimeInForce::GoodTilCancelled,
            price: Some(price),
            quantity,
            trigger_price: None,
            reduce_only: false,
        }
    }

    /// Convenience constructor for a market order.
    pub fn market(pair: TradingPair, side: Side, quantity: Decimal) -> Self {
        Self {
            pair,
            side,
            kind: OrderKind::Market,
            time_in_force: TimeInForce::ImmediateOrCancel,
            price: None,
            quantity,
            trigger_price: None,
            reduce_only: false,
        }
    }

    /// Validate the request shape before submission.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.pair.base.is_empty() || self.pair.quote.is_empty() {
            return Err(ExecutionError::Validation(
                "trading pair symbol must be non-empty".to_string(),
            ));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "order quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.kind.requires_price() && self.price.is_none() {
            return Err(ExecutionError::Validation(format!(
                "{} order requires a price",
                self.kind
            )));
        }
        if self.kind == OrderKind::Market && self.price.is_some() {
            return Err(ExecutionError::Validation(
                "market order must not carry a price".to_string(),
            ));
        }
        if self.kind.requires_trigger() && self.trigger_price.is_none() {
            return Err(ExecutionError::Validation(format!(
                "{} order requires a trigger price",
                self.kind
            )));
        }
        if let Some(price) = self.price
            && price <= Decimal::ZERO
        {
            return Err(ExecutionError::Validation(format!(
                "order price must be positive, got {price}"
            )));
        }
        Ok(())
    }

    /// Validate the reduce-only constraint against the current position:
    /// the order must strictly reduce the position's signed magnitude.
    pub fn validate_reduce_only(&self, position: Option<&Position>) -> Result<(), ExecutionError> {
        if !self.reduce_only {
            return Ok(());
        }

        let Some(position) = position.filter(|position| !position.is_flat()) else {
            return Err(ExecutionError::Validation(
                "reduce-only order requires an open position".to_string(),
            ));
        };

        let closing_side = if position.is_long() {
            Side::Sell
        } else {
            Side::Buy
        };
        if self.side != closing_side {
            return Err(ExecutionError::Validation(format!(
                "reduce-only {} order would increase the {} position",
                self.side, self.pair
            )));
        }
        if self.quantity > position.size.abs() {
            return Err(ExecutionError::Validation(format!(
                "reduce-only quantity {} exceeds position size {}",
                self.quantity,
                position.size.abs()
            )));
        }
        Ok(())
    }
}

/// A single execution against an order.
///
/// Fill ids are exchange-assigned and may be delivered more than once;
/// [`Order::apply_fill`] discards duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct Fill {
    pub id: FillId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub time: DateTime<Utc>,
}

/// Outcome of applying a [`Fill`] to an [`Order`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FillOutcome {
    /// The fill advanced the order.
    Applied,
    /// The fill id was already observed and was discarded.
    Duplicate,
}

/// Order entity tracked through its full lifecycle.
///
/// Invariants:
/// - `filled_quantity + remaining_quantity() == quantity`
/// - `avg_fill_price` is `Some` iff `filled_quantity > 0`
/// - `status` only advances along the [`OrderStatus`] state machine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Order {
    pub cid: ClientOrderId,
    /// Exchange-assigned id, present once submission was acknowledged.
    pub id: Option<OrderId>,
    pub pair: TradingPair,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub trigger_price: Option<Decimal>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub error: Option<SmolStr>,
    pub time_created: DateTime<Utc>,
    pub time_submitted: Option<DateTime<Utc>>,
    pub time_updated: DateTime<Utc>,
    pub time_filled: Option<DateTime<Utc>>,
    pub avg_fill_price: Option<Decimal>,
    pub total_fee: Decimal,
    pub fee_currency: SmolStr,
    observed_fills: BTreeSet<FillId>,
}

impl Order {
    /// Construct a `Pending` order from a validated request.
    pub fn from_request(request: &OrderRequest, cid: ClientOrderId, time: DateTime<Utc>) -> Self {
        Self {
            cid,
            id: None,
            pair: request.pair.clone(),
            side: request.side,
            kind: request.kind,
            time_in_force: request.time_in_force,
            price: request.price,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            trigger_price: request.trigger_price,
            reduce_only: request.reduce_only,
            status: OrderStatus::Pending,
            error: None,
            time_created: time,
            time_submitted: None,
            time_updated: time,
            time_filled: None,
            avg_fill_price: None,
            total_fee: Decimal::ZERO,
            fee_currency: request.pair.quote.clone(),
            observed_fills: BTreeSet::new(),
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Advance the lifecycle status.
    ///
    /// An invalid transition is an invariant violation and is returned as an
    /// error without mutating the order.
    pub fn transition(
        &mut self,
        next: OrderStatus,
        time: DateTime<Utc>,
    ) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if next == OrderStatus::Submitted && self.time_submitted.is_none() {
            self.time_submitted = Some(time);
        }
        if next == OrderStatus::Filled {
            self.time_filled = Some(time);
        }
        self.status = next;
        self.time_updated = time;
        Ok(())
    }

    /// Apply a fill event, idempotently on its [`FillId`].
    ///
    /// Updates `filled_quantity`, the quantity-weighted `avg_fill_price`,
    /// accumulates fees and advances the status to `PartiallyFilled` or
    /// `Filled` depending on the remaining quantity.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<FillOutcome, ExecutionError> {
        if self.observed_fills.contains(&fill.id) {
            return Ok(FillOutcome::Duplicate);
        }

        if fill.quantity <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "fill quantity must be positive, got {}",
                fill.quantity
            )));
        }
        if fill.quantity > self.remaining_quantity() {
            return Err(ExecutionError::Validation(format!(
                "fill quantity {} exceeds remaining {}",
                fill.quantity,
                self.remaining_quantity()
            )));
        }

        let filled_before = self.filled_quantity;
        self.filled_quantity += fill.quantity;
        self.avg_fill_price = Some(match self.avg_fill_price {
            Some(avg) => {
                (avg * filled_before + fill.price * fill.quantity) / self.filled_quantity
            }
            None => fill.price,
        });
        self.total_fee += fill.fee;
        self.observed_fills.insert(fill.id.clone());

        let next = if self.remaining_quantity().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next, fill.time)?;

        Ok(FillOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest::limit(
            TradingPair::new("BTC", "USDT"),
            Side::Buy,
            dec!(100),
            dec!(10),
        )
    }

    fn open_order() -> Order {
        let time = Utc::now();
        let mut order = Order::from_request(&request(), ClientOrderId::new("cid-1"), time);
        order.transition(OrderStatus::Submitted, time).unwrap();
        order.transition(OrderStatus::Open, time).unwrap();
        order
    }

    #[test]
    fn test_validate_shapes() {
        struct TestCase {
            input: OrderRequest,
            expected_ok: bool,
        }

        let pair = TradingPair::new("BTC", "USDT");
        let tests = vec![
            TestCase {
                // TC0: valid limit
                input: OrderRequest::limit(pair.clone(), Side::Buy, dec!(100), dec!(1)),
                expected_ok: true,
            },
            TestCase {
                // TC1: zero quantity
                input: OrderRequest::limit(pair.clone(), Side::Buy, dec!(100), dec!(0)),
                expected_ok: false,
            },
            TestCase {
                // TC2: limit without price
                input: OrderRequest {
                    price: None,
                    ..OrderRequest::limit(pair.clone(), Side::Buy, dec!(100), dec!(1))
                },
                expected_ok: false,
            },
            TestCase {
                // TC3: market with price
                input: OrderRequest {
                    price: Some(dec!(100)),
                    ..OrderRequest::market(pair.clone(), Side::Sell, dec!(1))
                },
                expected_ok: false,
            },
            TestCase {
                // TC4: trigger without trigger price
                input: OrderRequest {
                    kind: OrderKind::Trigger,
                    price: None,
                    ..OrderRequest::limit(pair.clone(), Side::Buy, dec!(100), dec!(1))
                },
                expected_ok: false,
            },
            TestCase {
                // TC5: stop limit with both prices
                input: OrderRequest {
                    kind: OrderKind::StopLimit,
                    trigger_price: Some(dec!(99)),
                    ..OrderRequest::limit(pair.clone(), Side::Buy, dec!(100), dec!(1))
                },
                expected_ok: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                test.input.validate().is_ok(),
                test.expected_ok,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_reduce_only_must_strictly_reduce() {
        let pair = TradingPair::new("BTC", "USDT");
        let long = Position::new_flat(pair.clone()).with_size(dec!(5), dec!(100));

        // Selling up to 5 against a long of 5 reduces.
        let mut sell = OrderRequest::limit(pair.clone(), Side::Sell, dec!(101), dec!(5));
        sell.reduce_only = true;
        assert!(sell.validate_reduce_only(Some(&long)).is_ok());

        // Selling 6 would flip the position.
        let mut sell_too_much = OrderRequest::limit(pair.clone(), Side::Sell, dec!(101), dec!(6));
        sell_too_much.reduce_only = true;
        assert!(sell_too_much.validate_reduce_only(Some(&long)).is_err());

        // Buying against a long increases.
        let mut buy = OrderRequest::limit(pair.clone(), Side::Buy, dec!(99), dec!(1));
        buy.reduce_only = true;
        assert!(buy.validate_reduce_only(Some(&long)).is_err());

        // No position at all.
        assert!(sell.validate_reduce_only(None).is_err());
    }

    #[test]
    fn test_fill_accounting() {
        let mut order = open_order();

        order
            .apply_fill(&Fill::new(
                FillId::new("f1"),
                dec!(100),
                dec!(4),
                dec!(0.4),
                Utc::now(),
            ))
            .unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, dec!(4));
        assert_eq!(order.remaining_quantity(), dec!(6));
        assert_eq!(order.avg_fill_price, Some(dec!(100)));

        order
            .apply_fill(&Fill::new(
                FillId::new("f2"),
                dec!(110),
                dec!(6),
                dec!(0.66),
                Utc::now(),
            ))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(10));
        assert_eq!(order.remaining_quantity(), dec!(0));
        // (100*4 + 110*6) / 10
        assert_eq!(order.avg_fill_price, Some(dec!(106)));
        assert_eq!(order.total_fee, dec!(1.06));
        assert!(order.time_filled.is_some());
    }

    #[test]
    fn test_duplicate_fill_discarded() {
        let mut order = open_order();
        let fill = Fill::new(FillId::new("F"), dec!(100), dec!(5), dec!(0.5), Utc::now());

        assert_eq!(order.apply_fill(&fill).unwrap(), FillOutcome::Applied);
        assert_eq!(order.filled_quantity, dec!(5));
        let status = order.status;

        assert_eq!(order.apply_fill(&fill).unwrap(), FillOutcome::Duplicate);
        assert_eq!(order.filled_quantity, dec!(5));
        assert_eq!(order.status, status);
        assert_eq!(order.total_fee, dec!(0.5));
    }

    #[test]
    fn test_filled_plus_remaining_is_quantity() {
        let mut order = open_order();
        let fills = [
            Fill::new(FillId::new("a"), dec!(100), dec!(1), dec!(0.1), Utc::now()),
            Fill::new(FillId::new("b"), dec!(101), dec!(2), dec!(0.2), Utc::now()),
            Fill::new(FillId::new("c"), dec!(102), dec!(3), dec!(0.3), Utc::now()),
        ];
        for fill in &fills {
            order.apply_fill(fill).unwrap();
            assert_eq!(
                order.filled_quantity + order.remaining_quantity(),
                order.quantity
            );
        }
    }

    #[test]
    fn test_overfill_rejected() {
        let mut order = open_order();
        let result = order.apply_fill(&Fill::new(
            FillId::new("f"),
            dec!(100),
            dec!(11),
            dec!(1),
            Utc::now(),
        ));
        assert!(matches!(result, Err(ExecutionError::Validation(_))));
        assert_eq!(order.filled_quantity, dec!(0));
    }

    #[test]
    fn test_invalid_transition_is_error() {
        let mut order = open_order();
        order.transition(OrderStatus::Canceled, Utc::now()).unwrap();
        assert!(matches!(
            order.transition(OrderStatus::Filled, Utc::now()),
            Err(ExecutionError::InvalidTransition { .. })
        ));
        assert_eq!(order.status, OrderStatus::Canceled);
    }
}
