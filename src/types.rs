//! Shared domain types for the watcher

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

use crate::errors::WatcherError;

// ============================================================================
// Claim
// ============================================================================

/// Party marked honest once a claim is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum Party {
    #[default]
    None = 0,
    Claimer = 1,
    Challenger = 2,
}

impl Party {
    pub const ALL: [Party; 3] = [Party::None, Party::Claimer, Party::Challenger];
}

impl TryFrom<u8> for Party {
    type Error = eyre::Report;

    fn try_from(value: u8) -> eyre::Result<Self> {
        match value {
            0 => Ok(Party::None),
            1 => Ok(Party::Claimer),
            2 => Ok(Party::Challenger),
            other => Err(eyre::eyre!("invalid honest party value {}", other)),
        }
    }
}

/// One assertion about the inbox state root for an epoch.
///
/// Identified only by its packed hash (see [`crate::hash::hash_claim`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Claim {
    pub state_root: B256,
    pub claimer: Address,
    pub timestamp_claimed: u32,
    pub timestamp_verification: u32,
    pub blocknumber_verification: u32,
    pub honest: Party,
    pub challenger: Address,
}

impl Claim {
    pub fn is_challenged(&self) -> bool {
        self.challenger != Address::ZERO
    }

    pub fn verification_started(&self) -> bool {
        self.timestamp_verification != 0
    }

    pub fn is_resolved(&self) -> bool {
        self.honest != Party::None
    }
}

/// Logs that explain a claim, as read from the outbox
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimEvents {
    pub state_root: B256,
    pub claimer: Address,
    pub timestamp_claimed: u32,
    /// `(timestamp, block number)` of the VerificationStarted log, if any
    pub verification: Option<(u32, u32)>,
    pub challenger: Option<Address>,
}

/// Most recent claim made on the outbox, used to decide whether a snapshot is new
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestClaim {
    pub epoch: u64,
    pub state_root: B256,
    pub challenged: bool,
}

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Finalized,
    Number(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

/// Which chain a transaction lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSide {
    Inbox,
    Outbox,
    /// Chain the rollup inbox settles on (where L2 -> L1 messages execute)
    Settlement,
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainSide::Inbox => "inbox",
            ChainSide::Outbox => "outbox",
            ChainSide::Settlement => "settlement",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Dispute resolution messages
// ============================================================================

/// L2 -> L1 message emitted by ArbSys when a snapshot is sent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct L2ToL1Message {
    pub caller: Address,
    pub destination: Address,
    pub arb_block_num: U256,
    pub eth_block_num: U256,
    pub timestamp: U256,
    pub callvalue: U256,
    pub data: Bytes,
    pub position: U256,
}

/// A snapshot sent from the inbox to settle a dispute
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SnapshotSent {
    pub epoch: u64,
    pub tx_hash: B256,
    pub l2_block: u64,
    pub l2_timestamp: u64,
    pub message: L2ToL1Message,
}

/// Settlement-layer status of an L2 -> L1 message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageStatus {
    /// Send root covering the message is not confirmed yet
    Unconfirmed,
    /// Executable with a proof against `send_count`
    Confirmed { send_count: u64 },
    Executed,
}

// ============================================================================
// Actions and transactions
// ============================================================================

/// One pending-transaction slot per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxKind {
    Claim,
    StartVerification,
    VerifySnapshot,
    WithdrawClaimDeposit,
    Challenge,
    WithdrawChallengeDeposit,
    SendSnapshot,
    ResolveDispute,
    SaveSnapshot,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Claim => "claim",
            TxKind::StartVerification => "startVerification",
            TxKind::VerifySnapshot => "verifySnapshot",
            TxKind::WithdrawClaimDeposit => "withdrawClaimDeposit",
            TxKind::Challenge => "challenge",
            TxKind::WithdrawChallengeDeposit => "withdrawChallengeDeposit",
            TxKind::SendSnapshot => "sendSnapshot",
            TxKind::ResolveDispute => "resolveDispute",
            TxKind::SaveSnapshot => "saveSnapshot",
        }
    }

    pub fn chain(&self) -> ChainSide {
        match self {
            TxKind::SendSnapshot | TxKind::SaveSnapshot => ChainSide::Inbox,
            TxKind::ResolveDispute => ChainSide::Settlement,
            _ => ChainSide::Outbox,
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-specified contract call handed to a [`crate::chain::TransactionSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxCall {
    Claim { epoch: u64, state_root: B256 },
    StartVerification { epoch: u64, claim: Claim },
    VerifySnapshot { epoch: u64, claim: Claim },
    WithdrawClaimDeposit { epoch: u64, claim: Claim },
    Challenge { epoch: u64, claim: Claim },
    WithdrawChallengeDeposit { epoch: u64, claim: Claim },
    SendSnapshot { epoch: u64, claim: Claim },
    ResolveDispute { epoch: u64, sent: SnapshotSent, send_count: u64 },
    SaveSnapshot { epoch: u64 },
}

impl TxCall {
    pub fn kind(&self) -> TxKind {
        match self {
            TxCall::Claim { .. } => TxKind::Claim,
            TxCall::StartVerification { .. } => TxKind::StartVerification,
            TxCall::VerifySnapshot { .. } => TxKind::VerifySnapshot,
            TxCall::WithdrawClaimDeposit { .. } => TxKind::WithdrawClaimDeposit,
            TxCall::Challenge { .. } => TxKind::Challenge,
            TxCall::WithdrawChallengeDeposit { .. } => TxKind::WithdrawChallengeDeposit,
            TxCall::SendSnapshot { .. } => TxKind::SendSnapshot,
            TxCall::ResolveDispute { .. } => TxKind::ResolveDispute,
            TxCall::SaveSnapshot { .. } => TxKind::SaveSnapshot,
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            TxCall::Claim { epoch, .. }
            | TxCall::StartVerification { epoch, .. }
            | TxCall::VerifySnapshot { epoch, .. }
            | TxCall::WithdrawClaimDeposit { epoch, .. }
            | TxCall::Challenge { epoch, .. }
            | TxCall::WithdrawChallengeDeposit { epoch, .. }
            | TxCall::SendSnapshot { epoch, .. }
            | TxCall::ResolveDispute { epoch, .. }
            | TxCall::SaveSnapshot { epoch } => *epoch,
        }
    }
}

/// Result of a successful broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Broadcast {
    pub hash: B256,
    pub nonce: u64,
}

/// Mined receipt summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub block_number: u64,
    pub success: bool,
}

// ============================================================================
// Roles
// ============================================================================

/// Which roles this watcher plays (`BOT_PATH`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotPath {
    Claimer,
    Challenger,
    Both,
}

impl BotPath {
    pub fn claims(&self) -> bool {
        matches!(self, BotPath::Claimer | BotPath::Both)
    }

    pub fn challenges(&self) -> bool {
        matches!(self, BotPath::Challenger | BotPath::Both)
    }
}

impl FromStr for BotPath {
    type Err = WatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claimer" => Ok(BotPath::Claimer),
            "challenger" => Ok(BotPath::Challenger),
            "both" => Ok(BotPath::Both),
            _ => Err(WatcherError::InvalidBotPath(s.to_string())),
        }
    }
}

impl fmt::Display for BotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BotPath::Claimer => "claimer",
            BotPath::Challenger => "challenger",
            BotPath::Both => "both",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock source in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Settable clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_path_parsing() {
        assert_eq!("claimer".parse::<BotPath>().unwrap(), BotPath::Claimer);
        assert_eq!(" Challenger ".parse::<BotPath>().unwrap(), BotPath::Challenger);
        assert_eq!("BOTH".parse::<BotPath>().unwrap(), BotPath::Both);
        assert_eq!(
            "watcher".parse::<BotPath>(),
            Err(WatcherError::InvalidBotPath("watcher".to_string()))
        );
    }

    #[test]
    fn test_bot_path_roles() {
        assert!(BotPath::Claimer.claims());
        assert!(!BotPath::Claimer.challenges());
        assert!(BotPath::Challenger.challenges());
        assert!(BotPath::Both.claims() && BotPath::Both.challenges());
    }

    #[test]
    fn test_party_from_u8() {
        assert_eq!(Party::try_from(2u8).unwrap(), Party::Challenger);
        assert!(Party::try_from(3u8).is_err());
    }

    #[test]
    fn test_tx_kind_chain_routing() {
        assert_eq!(TxKind::Claim.chain(), ChainSide::Outbox);
        assert_eq!(TxKind::SendSnapshot.chain(), ChainSide::Inbox);
        assert_eq!(TxKind::ResolveDispute.chain(), ChainSide::Settlement);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }
}
