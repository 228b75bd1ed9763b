//! Trailing-window aggregate types and the period-over-period math.

use serde::{Deserialize, Serialize};

/// Fixed-length trailing windows supported by the rollup engine. Each is
/// always paired with the immediately preceding window of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    Week,
    TwoWeek,
    Month,
    TwoMonth,
}

impl Window {
    pub const ALL: [Window; 4] = [Window::Week, Window::TwoWeek, Window::Month, Window::TwoMonth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Week => "week",
            Window::TwoWeek => "two_week",
            Window::Month => "month",
            Window::TwoMonth => "two_month",
        }
    }
}

/// Scope of a rollup: one category with all of its descendants, or one
/// seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Category(i64),
    Seller(i64),
}

/// Metrics for one period of one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub order_amount: i64,
    pub revenue: f64,
    pub available_amount: i64,
    pub seller_count: i64,
    pub product_count: i64,
    pub order_per_product: f64,
    pub order_per_seller: f64,
    pub revenue_per_product: f64,
    pub average_bill: f64,
}

impl WindowMetrics {
    /// Derive per-product / per-seller rates after the sums are in.
    /// An empty scope reports zero rates, never a division error.
    pub fn finalize(&mut self) {
        self.order_per_product = ratio(self.order_amount as f64, self.product_count as f64);
        self.order_per_seller = ratio(self.order_amount as f64, self.seller_count as f64);
        self.revenue_per_product = ratio(self.revenue, self.product_count as f64);
        self.average_bill = ratio(self.revenue, self.order_amount as f64);
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Percentage differences between the current and previous period, one per
/// metric in [`WindowMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowDiff {
    pub order_amount_pct: f64,
    pub revenue_pct: f64,
    pub available_amount_pct: f64,
    pub seller_count_pct: f64,
    pub product_count_pct: f64,
    pub order_per_product_pct: f64,
    pub order_per_seller_pct: f64,
    pub revenue_per_product_pct: f64,
    pub average_bill_pct: f64,
}

/// `(current - previous) / previous * 100`, with a defined sentinel instead
/// of an infinity: both zero reports 0%, a previous of zero with a non-zero
/// current reports 100%.
pub fn pct_diff(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Rollup result for one (scope, window): the current period, the preceding
/// period of equal length and the derived percentage differences. Replaced
/// wholesale on recomputation, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub scope: Scope,
    pub window: Window,
    pub current: WindowMetrics,
    pub previous: WindowMetrics,
    pub diff: WindowDiff,
}

impl WindowAggregate {
    pub fn new(scope: Scope, window: Window, current: WindowMetrics, previous: WindowMetrics) -> Self {
        let diff = WindowDiff {
            order_amount_pct: pct_diff(current.order_amount as f64, previous.order_amount as f64),
            revenue_pct: pct_diff(current.revenue, previous.revenue),
            available_amount_pct: pct_diff(
                current.available_amount as f64,
                previous.available_amount as f64,
            ),
            seller_count_pct: pct_diff(current.seller_count as f64, previous.seller_count as f64),
            product_count_pct: pct_diff(current.product_count as f64, previous.product_count as f64),
            order_per_product_pct: pct_diff(current.order_per_product, previous.order_per_product),
            order_per_seller_pct: pct_diff(current.order_per_seller, previous.order_per_seller),
            revenue_per_product_pct: pct_diff(
                current.revenue_per_product,
                previous.revenue_per_product,
            ),
            average_bill_pct: pct_diff(current.average_bill, previous.average_bill),
        };
        Self {
            scope,
            window,
            current,
            previous,
            diff,
        }
    }
}
