use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage accounting for one account.
///
/// `used_bytes` only moves on commit or reclaim; admissions in flight are
/// held in `reserved_bytes` until they are committed or released.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub used_bytes: u64,
    #[serde(default, skip_serializing)]
    pub reserved_bytes: u64,
    pub limit_bytes: u64,
}

impl Account {
    pub fn new(id: AccountId, limit_bytes: u64) -> Self {
        Self {
            id,
            used_bytes: 0,
            reserved_bytes: 0,
            limit_bytes,
        }
    }

    pub fn available(&self) -> u64 {
        self.limit_bytes
            .saturating_sub(self.used_bytes)
            .saturating_sub(self.reserved_bytes)
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 100.0;
        }
        (self.used_bytes as f64 / self.limit_bytes as f64 * 100.0).min(100.0)
    }
}

/// Quota snapshot for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaSummary {
    pub account: AccountId,
    pub used_bytes: u64,
    pub reserved_bytes: u64,
    pub limit_bytes: u64,
    pub available_bytes: u64,
    pub usage_percentage: f64,
}

impl From<&Account> for QuotaSummary {
    fn from(account: &Account) -> Self {
        Self {
            account: account.id,
            used_bytes: account.used_bytes,
            reserved_bytes: account.reserved_bytes,
            limit_bytes: account.limit_bytes,
            available_bytes: account.available(),
            usage_percentage: account.usage_percentage(),
        }
    }
}
