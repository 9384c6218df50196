//! Fixed constants the engine loops run on.
//!
//! These are treated as fixed for now; a production deployment would likely want gas
//! limit/price to be configurable rather than baked in.

use std::time::Duration;

/// Base sleep between loop iterations.
pub const CLOCK_TICK: Duration = Duration::from_secs(3);

/// Block-range window an ingress step scans per call to `GetLogs`.
pub const INGRESS_WINDOW: u64 = 10;

/// `VerifyAddress` requires `currentHeight >= birth + AGE_LIMIT`.
pub const AGE_LIMIT: u64 = 1;

/// Fixed gas limit for an ingress transaction.
pub const GAS_LIMIT: u64 = 100_000_000;

/// Fixed gas price for an ingress transaction, in wei.
pub const GAS_PRICE: u128 = 10_000;

/// Gas limit for a plain value-transfer top-up transaction from the master account.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Maximum outbound events drained into signed transactions per egress step.
pub const EGRESS_BATCH_LIMIT: usize = 100;

/// Notifier balance floor: below `1` unit the egress loop waits for a top-up.
pub const MIN_NOTIFIER_BALANCE: u128 = 1;

/// Supervisor funding pass: notifiers below this balance get topped up.
pub const LOW_WATER_MARK: u128 = 10;

/// Supervisor funding pass: the fixed top-up amount sent to a low notifier.
pub const TOPUP_AMOUNT: u128 = 100;

/// Sleep while an egress loop waits on a notifier top-up.
pub const BALANCE_WAIT: Duration = Duration::from_secs(5);
