//! Prometheus exposition names and recording helpers.
//!
//! Names are part of the platform's public monitoring contract and must stay
//! bit-exact across releases.

use metrics::{counter, gauge};

pub const UPTIME_SECONDS: &str = "zigquant_uptime_seconds";
pub const REQUESTS_TOTAL: &str = "zigquant_requests_total";
pub const EXCHANGE_CONNECTED: &str = "zigquant_exchange_connected";
pub const POSITIONS_COUNT: &str = "zigquant_positions_count";

pub const GRIDS_RUNNING: &str = "zigquant_grids_running";
pub const STRATEGIES_RUNNING: &str = "zigquant_strategies_running";
pub const BACKTESTS_RUNNING: &str = "zigquant_backtests_running";
pub const ORDERS_SUBMITTED_TOTAL: &str = "zigquant_orders_submitted_total";
pub const ORDERS_REJECTED_RISK_TOTAL: &str = "zigquant_orders_rejected_risk_total";
pub const ALERTS_TOTAL: &str = "zigquant_alerts_total";
pub const KILL_SWITCH_ACTIVE: &str = "zigquant_kill_switch_active";

/// Record engine uptime.
pub fn record_uptime(seconds: f64) {
    gauge!(UPTIME_SECONDS).set(seconds);
}

/// Count one handled engine request.
pub fn record_request(operation: &'static str) {
    counter!(REQUESTS_TOTAL, "operation" => operation).increment(1);
}

/// Record exchange connectivity as a 0/1 gauge.
pub fn record_exchange_connected(connected: bool) {
    gauge!(EXCHANGE_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Record the number of open positions.
pub fn record_positions_count(count: usize) {
    gauge!(POSITIONS_COUNT).set(count as f64);
}

/// Record running worker counts.
pub fn record_worker_counts(grids: usize, strategies: usize, backtests: usize) {
    gauge!(GRIDS_RUNNING).set(grids as f64);
    gauge!(STRATEGIES_RUNNING).set(strategies as f64);
    gauge!(BACKTESTS_RUNNING).set(backtests as f64);
}

/// Count one submitted order.
pub fn record_order_submitted(owner: &'static str) {
    counter!(ORDERS_SUBMITTED_TOTAL, "owner" => owner).increment(1);
}

/// Count one risk-rejected order.
pub fn record_order_rejected_by_risk() {
    counter!(ORDERS_REJECTED_RISK_TOTAL).increment(1);
}

/// Count one raised alert.
pub fn record_alert(level: &'static str) {
    counter!(ALERTS_TOTAL, "level" => level).increment(1);
}

/// Record the kill switch flag as a 0/1 gauge.
pub fn record_kill_switch(active: bool) {
    gauge!(KILL_SWITCH_ACTIVE).set(if active { 1.0 } else { 0.0 });
}
