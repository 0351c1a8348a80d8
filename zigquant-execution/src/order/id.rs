use derive_more::{Display, From};
use rand::Rng;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Locally unique client-assigned order identifier.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct ClientOrderId(pub SmolStr);

impl ClientOrderId {
    /// Construct a `ClientOrderId` from the specified string.
    ///
    /// Use [`Self::random`] to generate a fresh `ClientOrderId`.
    pub fn new<S: Into<SmolStr>>(id: S) -> Self {
        Self(id.into())
    }

    /// Generate a fresh `ClientOrderId` of the form `zq-<20 hex digits>`.
    ///
    /// Carries 80 random bits; the 23 byte rendering stays within
    /// [`SmolStr`]'s inline capacity.
    pub fn random() -> Self {
        let entropy = rand::rng().random::<u128>() >> 48;
        Self(format_smolstr!("zq-{entropy:020x}"))
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::random()
    }
}

/// Exchange-assigned order identifier, present once an order was submitted.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct OrderId(pub SmolStr);

impl OrderId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Exchange-assigned fill identifier, used to discard duplicate fill events.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct FillId(pub SmolStr);

impl FillId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}
