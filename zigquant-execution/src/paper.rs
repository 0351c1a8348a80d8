use crate::{
    balance::{AssetBalance, Balance},
    client::{ExchangeClient, OrderUpdate, OrderUpdateKind, Quote},
    error::ExecutionError,
    order::{
        Fill, Order, OrderKind, OrderRequest, TimeInForce,
        id::{ClientOrderId, FillId, OrderId},
        status::OrderStatus,
    },
    position::Position,
    trade::{Trade, TradeId},
};
use async_trait::async_trait;
use chrono::Utc;
use fnv::FnvHashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use smol_str::{SmolStr, format_smolstr};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;
use zigquant_instrument::{Side, pair::TradingPair};

const ORDER_UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Paper exchange configuration.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Taker/maker fee rate applied to every fill's notional.
    pub fee_rate: Decimal,
    /// Initial free balances per asset symbol.
    pub initial_balances: Vec<(SmolStr, Decimal)>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
            initial_balances: vec![(SmolStr::new("USDT"), Decimal::from(100_000))],
        }
    }
}

#[derive(Debug)]
struct Inner {
    quotes: FnvHashMap<TradingPair, Quote>,
    orders: IndexMap<ClientOrderId, Order>,
    positions: FnvHashMap<TradingPair, Position>,
    balances: FnvHashMap<SmolStr, Balance>,
    trades: Vec<Trade>,
    next_id: u64,
}

/// In-memory exchange matching client orders against the last published quote.
///
/// Market (and marketable limit) orders fill immediately; resting limit orders
/// fill when a subsequent quote crosses their price. Fills stream to
/// `subscribe_order_updates` subscribers exactly as a live venue would deliver
/// them.
#[derive(Debug)]
pub struct PaperExchange {
    config: PaperConfig,
    state: Mutex<Inner>,
    updates_tx: broadcast::Sender<OrderUpdate>,
    connected: AtomicBool,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let balances = config
            .initial_balances
            .iter()
            .map(|(asset, amount)| (asset.clone(), Balance::new(*amount, *amount)))
            .collect();

        let (updates_tx, _) = broadcast::channel(ORDER_UPDATE_CHANNEL_CAPACITY);
        Self {
            config,
            state: Mutex::new(Inner {
                quotes: FnvHashMap::default(),
                orders: IndexMap::new(),
                positions: FnvHashMap::default(),
                balances,
                trades: Vec::new(),
                next_id: 0,
            }),
            updates_tx,
            connected: AtomicBool::new(true),
        }
    }

    /// Publish a new top-of-book quote, matching any resting orders it crosses.
    pub fn set_quote(&self, pair: TradingPair, bid: Decimal, ask: Decimal) {
        let mut state = self.state.lock();
        state.quotes.insert(
            pair.clone(),
            Quote::new(bid, ask, Utc::now()),
        );

        // Resting limit orders crossed by the new quote fill at the quote.
        let crossed: Vec<(ClientOrderId, Decimal)> = state
            .orders
            .iter()
            .filter(|(_, order)| order.pair == pair && order.status.is_active())
            .filter_map(|(cid, order)| {
                let price = order.price?;
                match order.side {
                    Side::Buy if ask <= price => Some((cid.clone(), ask)),
                    Side::Sell if bid >= price => Some((cid.clone(), bid)),
                    _ => None,
                }
            })
            .collect();

        for (cid, price) in crossed {
            self.fill_order(&mut state, &cid, price);
        }
    }

    /// Toggle the simulated transport status.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Exchange-side trade journal.
    pub fn trades(&self) -> Vec<Trade> {
        self.state.lock().trades.clone()
    }

    /// Fill the full remaining quantity of an order at `price`.
    fn fill_order(&self, state: &mut Inner, cid: &ClientOrderId, price: Decimal) {
        let fee_rate = self.config.fee_rate;
        let time = Utc::now();
        state.next_id += 1;
        let fill_id = FillId(format_smolstr!("paper-fill-{}", state.next_id));
        let trade_id = TradeId(format_smolstr!("paper-trade-{}", state.next_id));

        let Some(order) = state.orders.get_mut(cid) else {
            return;
        };

        let quantity = order.remaining_quantity();
        let notional = price * quantity;
        let fee = notional.abs() * fee_rate;
        let fill = Fill::new(fill_id, price, quantity, fee, time);

        if let Err(error) = order.apply_fill(&fill) {
            debug!(%cid, %error, "paper fill dropped");
            return;
        }

        let (pair, side, order_id) = (order.pair.clone(), order.side, order.id.clone());

        let realised = state
            .positions
            .entry(pair.clone())
            .or_insert_with(|| Position::new_flat(pair.clone()))
            .apply_fill(side, quantity, price);

        // Quote-currency account: realised PnL credits, fees debit.
        let balance = state.balances.entry(pair.quote.clone()).or_default();
        balance.total += realised - fee;
        balance.free += realised - fee;

        state.trades.push(Trade::new(
            trade_id,
            pair.clone(),
            order_id.clone().unwrap_or_else(|| OrderId::new("paper")),
            time,
            side,
            price,
            quantity,
            fee,
            pair.quote.clone(),
        ));

        // Receiver-less send only means nobody subscribed yet.
        let _ = self.updates_tx.send(OrderUpdate::new(
            cid.clone(),
            order_id,
            pair,
            OrderUpdateKind::Fill(fill),
            time,
        ));
    }

    fn emit_status(&self, order: &Order) {
        let _ = self.updates_tx.send(OrderUpdate::new(
            order.cid.clone(),
            order.id.clone(),
            order.pair.clone(),
            OrderUpdateKind::StatusChange(order.status),
            Utc::now(),
        ));
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn best_bid_ask(&self, pair: &TradingPair) -> Result<Quote, ExecutionError> {
        self.state
            .lock()
            .quotes
            .get(pair)
            .copied()
            .ok_or_else(|| ExecutionError::NoMarketData(pair.clone()))
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<Order, ExecutionError> {
        request.validate()?;

        let time = Utc::now();
        let mut state = self.state.lock();

        request.validate_reduce_only(state.positions.get(&request.pair))?;

        let quote = state.quotes.get(&request.pair).copied();
        let mut order = Order::from_request(&request, ClientOrderId::random(), time);
        order.transition(OrderStatus::Submitted, time)?;

        state.next_id += 1;
        order.id = Some(OrderId(format_smolstr!("paper-{}", state.next_id)));

        // Marketable price for the taker side, if a quote exists.
        let taker_price = quote.map(|quote| match order.side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        });

        let marketable = match (order.kind, order.price, taker_price) {
            (OrderKind::Market, _, _) => true,
            (_, Some(limit), Some(taker)) => match order.side {
                Side::Buy => taker <= limit,
                Side::Sell => taker >= limit,
            },
            _ => false,
        };

        match (order.kind, order.time_in_force, marketable) {
            (OrderKind::Market, _, _) => {
                let Some(price) = taker_price else {
                    return Err(ExecutionError::NoMarketData(request.pair));
                };
                order.transition(OrderStatus::Open, time)?;
                let cid = order.cid.clone();
                state.orders.insert(cid.clone(), order);
                self.fill_order(&mut state, &cid, price);
                Ok(state.orders[&cid].clone())
            }
            (_, TimeInForce::AddLiquidityOnly, true) => {
                order.error = Some(SmolStr::new("post-only order would take liquidity"));
                order.transition(OrderStatus::Rejected, time)?;
                self.emit_status(&order);
                state.orders.insert(order.cid.clone(), order.clone());
                Ok(order)
            }
            (_, TimeInForce::ImmediateOrCancel, false) => {
                order.transition(OrderStatus::Open, time)?;
                order.transition(OrderStatus::Canceled, time)?;
                self.emit_status(&order);
                state.orders.insert(order.cid.clone(), order.clone());
                Ok(order)
            }
            (_, _, true) => {
                order.transition(OrderStatus::Open, time)?;
                let cid = order.cid.clone();
                state.orders.insert(cid.clone(), order);
                // Safe: marketable implies a quote exists.
                let price = taker_price.expect("marketable order requires a quote");
                self.fill_order(&mut state, &cid, price);
                Ok(state.orders[&cid].clone())
            }
            (_, _, false) => {
                order.transition(OrderStatus::Open, time)?;
                state.orders.insert(order.cid.clone(), order.clone());
                Ok(order)
            }
        }
    }

    async fn cancel_order(&self, cid: &ClientOrderId) -> Result<Order, ExecutionError> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(cid)
            .ok_or_else(|| ExecutionError::OrderNotFound(cid.clone()))?;

        if order.status.is_final() {
            return Err(ExecutionError::OrderAlreadyFinal(order.status));
        }

        order.transition(OrderStatus::Canceled, Utc::now())?;
        let order = order.clone();
        drop(state);

        self.emit_status(&order);
        Ok(order)
    }

    async fn get_order(&self, cid: &ClientOrderId) -> Result<Order, ExecutionError> {
        self.state
            .lock()
            .orders
            .get(cid)
            .cloned()
            .ok_or_else(|| ExecutionError::OrderNotFound(cid.clone()))
    }

    async fn open_orders(&self, pair: Option<&TradingPair>) -> Result<Vec<Order>, ExecutionError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|order| order.status.is_active())
            .filter(|order| pair.is_none_or(|pair| order.pair == *pair))
            .cloned()
            .collect())
    }

    async fn positions(&self) -> Result<Vec<Position>, ExecutionError> {
        Ok(self
            .state
            .lock()
            .positions
            .values()
            .filter(|position| !position.is_flat())
            .cloned()
            .collect())
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>, ExecutionError> {
        let time = Utc::now();
        Ok(self
            .state
            .lock()
            .balances
            .iter()
            .map(|(asset, balance)| AssetBalance::new(asset.clone(), *balance, time))
            .collect())
    }

    fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.updates_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDT")
    }

    fn exchange() -> PaperExchange {
        let exchange = PaperExchange::new(PaperConfig::default());
        exchange.set_quote(pair(), dec!(99), dec!(101));
        exchange
    }

    #[tokio::test]
    async fn test_no_market_data() {
        let exchange = PaperExchange::new(PaperConfig::default());
        let result = exchange.best_bid_ask(&pair()).await;
        assert!(matches!(result, Err(ExecutionError::NoMarketData(_))));
    }

    #[tokio::test]
    async fn test_market_order_fills_at_quote() {
        let exchange = exchange();
        let order = exchange
            .submit_order(OrderRequest::market(pair(), Side::Buy, dec!(2)))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(dec!(101)));

        let positions = exchange.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, dec!(2));
        assert_eq!(exchange.trades().len(), 1);
    }

    #[tokio::test]
    async fn test_resting_limit_fills_when_quote_crosses() {
        let exchange = exchange();
        let mut updates = exchange.subscribe_order_updates();

        let order = exchange
            .submit_order(OrderRequest::limit(pair(), Side::Buy, dec!(95), dec!(1)))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        // Quote drops through the resting buy.
        exchange.set_quote(pair(), dec!(93), dec!(94));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.cid, order.cid);
        assert!(matches!(update.kind, OrderUpdateKind::Fill(ref fill) if fill.price == dec!(94)));

        let filled = exchange.get_order(&order.cid).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_post_only_rejected_when_marketable() {
        let exchange = exchange();
        let mut request = OrderRequest::limit(pair(), Side::Buy, dec!(102), dec!(1));
        request.time_in_force = TimeInForce::AddLiquidityOnly;

        let order = exchange.submit_order(request).await.unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.error.is_some());
    }

    #[tokio::test]
    async fn test_ioc_cancelled_when_not_marketable() {
        let exchange = exchange();
        let mut request = OrderRequest::limit(pair(), Side::Buy, dec!(95), dec!(1));
        request.time_in_force = TimeInForce::ImmediateOrCancel;

        let order = exchange.submit_order(request).await.unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let exchange = exchange();
        let order = exchange
            .submit_order(OrderRequest::limit(pair(), Side::Buy, dec!(95), dec!(1)))
            .await
            .unwrap();

        let cancelled = exchange.cancel_order(&order.cid).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Canceled);

        // A second cancel is an error.
        assert!(matches!(
            exchange.cancel_order(&order.cid).await,
            Err(ExecutionError::OrderAlreadyFinal(_))
        ));
    }

    #[tokio::test]
    async fn test_fees_and_realised_pnl_hit_quote_balance() {
        let exchange = PaperExchange::new(PaperConfig {
            fee_rate: dec!(0.001),
            ..PaperConfig::default()
        });
        exchange.set_quote(pair(), dec!(99), dec!(101));

        exchange
            .submit_order(OrderRequest::market(pair(), Side::Buy, dec!(1)))
            .await
            .unwrap();
        // Close at a better bid.
        exchange.set_quote(pair(), dec!(110), dec!(112));
        exchange
            .submit_order(OrderRequest::market(pair(), Side::Sell, dec!(1)))
            .await
            .unwrap();

        let balances = exchange.balances().await.unwrap();
        let usdt = balances
            .iter()
            .find(|balance| balance.asset == "USDT")
            .unwrap();

        // Realised 110 - 101 = 9, fees 0.101 + 0.110.
        let expected = dec!(100_000) + dec!(9) - dec!(0.101) - dec!(0.110);
        assert_eq!(usdt.balance.total, expected);
    }

    #[tokio::test]
    async fn test_reduce_only_enforced() {
        let exchange = exchange();
        let mut request = OrderRequest::market(pair(), Side::Sell, dec!(1));
        request.reduce_only = true;
        assert!(matches!(
            exchange.submit_order(request).await,
            Err(ExecutionError::Validation(_))
        ));
    }
}
