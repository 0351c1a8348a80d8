use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`Order`](super::Order).
///
/// ```text
/// Pending -> Submitted -> { Open | Rejected }
/// Open -> { PartiallyFilled | Filled | Canceled | Triggered | MarginCanceled }
/// PartiallyFilled -> { Filled | Canceled | MarginCanceled }
/// Triggered -> { Filled | Canceled }
/// ```
///
/// Transitions not listed are invalid, and a terminal status never changes again.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Triggered,
    MarginCanceled,
}

impl OrderStatus {
    /// Whether this status is terminal.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::MarginCanceled
        )
    }

    /// Whether the order can still interact with the market.
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-asserting the current status is always permitted (eg/ a second
    /// partial fill while already `PartiallyFilled`).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return !self.is_final();
        }

        match self {
            Self::Pending => matches!(next, Self::Submitted),
            Self::Submitted => matches!(next, Self::Open | Self::Rejected),
            Self::Open => matches!(
                next,
                Self::PartiallyFilled
                    | Self::Filled
                    | Self::Canceled
                    | Self::Triggered
                    | Self::MarginCanceled
            ),
            Self::PartiallyFilled => {
                matches!(next, Self::Filled | Self::Canceled | Self::MarginCanceled)
            }
            Self::Triggered => matches!(next, Self::Filled | Self::Canceled),
            Self::Filled | Self::Canceled | Self::Rejected | Self::MarginCanceled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_active_partition() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Open,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Triggered,
            OrderStatus::MarginCanceled,
        ];
        for status in all {
            assert_ne!(status.is_final(), status.is_active(), "{status} not partitioned");
        }
    }

    #[test]
    fn test_transitions() {
        struct TestCase {
            from: OrderStatus,
            to: OrderStatus,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: submission path
                from: OrderStatus::Pending,
                to: OrderStatus::Submitted,
                expected: true,
            },
            TestCase {
                // TC1: cannot skip submission
                from: OrderStatus::Pending,
                to: OrderStatus::Open,
                expected: false,
            },
            TestCase {
                // TC2: rejection at submission
                from: OrderStatus::Submitted,
                to: OrderStatus::Rejected,
                expected: true,
            },
            TestCase {
                // TC3: partial fill
                from: OrderStatus::Open,
                to: OrderStatus::PartiallyFilled,
                expected: true,
            },
            TestCase {
                // TC4: repeated partial fill re-asserts status
                from: OrderStatus::PartiallyFilled,
                to: OrderStatus::PartiallyFilled,
                expected: true,
            },
            TestCase {
                // TC5: partial fill cannot be rejected
                from: OrderStatus::PartiallyFilled,
                to: OrderStatus::Rejected,
                expected: false,
            },
            TestCase {
                // TC6: trigger path
                from: OrderStatus::Triggered,
                to: OrderStatus::Filled,
                expected: true,
            },
            TestCase {
                // TC7: terminal states never change
                from: OrderStatus::Filled,
                to: OrderStatus::Canceled,
                expected: false,
            },
            TestCase {
                // TC8: terminal states cannot re-assert
                from: OrderStatus::Canceled,
                to: OrderStatus::Canceled,
                expected: false,
            },
            TestCase {
                // TC9: margin cancel from partial fill
                from: OrderStatus::PartiallyFilled,
                to: OrderStatus::MarginCanceled,
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                test.from.can_transition_to(test.to),
                test.expected,
                "TC{index} failed"
            );
        }
    }
}
