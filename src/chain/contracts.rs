//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. `Claim` and `Party`
//! are declared once and shared by every inbox and outbox interface.

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{address, Address};
use alloy::sol;

use crate::types;

/// ArbSys precompile on Arbitrum chains
pub const ARB_SYS_ADDRESS: Address = address!("0000000000000000000000000000000000000064");

/// NodeInterface virtual contract on Arbitrum chains
pub const NODE_INTERFACE_ADDRESS: Address = address!("00000000000000000000000000000000000000C8");

sol! {
    #[derive(Debug, PartialEq, Eq)]
    enum Party {
        None,
        Claimer,
        Challenger
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Claim {
        bytes32 stateRoot;
        address claimer;
        uint32 timestampClaimed;
        uint32 timestampVerification;
        uint32 blocknumberVerification;
        Party honest;
        address challenger;
    }

    // ========================================================================
    // Inbox (Arbitrum)
    // ========================================================================

    /// Reads and events shared by every inbox
    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaInbox {
        event MessageSent(bytes nodeData);
        event SnapshotSaved(bytes32 snapshot, uint256 epoch, uint64 count);
        event SnapshotSent(uint256 indexed epochSent, bytes32 ticketId);

        function count() external view returns (uint64);
        function epochPeriod() external view returns (uint256);
        function snapshots(uint256 epoch) external view returns (bytes32);
        function saveSnapshot() external;
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaInboxArbToEth {
        function sendSnapshot(uint256 epoch, Claim memory claim) external;
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaInboxArbToGnosis {
        function sendSnapshot(uint256 epoch, uint256 gasLimit, Claim memory claim) external;
    }

    // ========================================================================
    // Outbox
    // ========================================================================

    /// Reads and events shared by every outbox
    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaOutbox {
        event Claimed(address indexed claimer, uint256 indexed epoch, bytes32 indexed stateRoot);
        event Challenged(uint256 indexed epoch, address indexed challenger);
        event VerificationStarted(uint256 indexed epoch);
        event Verified(uint256 indexed epoch);

        function deposit() external view returns (uint256);
        function epochPeriod() external view returns (uint256);
        function claimHashes(uint256 epoch) external view returns (bytes32);
        function stateRoot() external view returns (bytes32);
        function minChallengePeriod() external view returns (uint256);
        function sequencerDelayLimit() external view returns (uint256);

        function claim(uint256 epoch, bytes32 stateRoot) external payable;
        function startVerification(uint256 epoch, Claim memory claim) external;
        function verifySnapshot(uint256 epoch, Claim memory claim) external;
        function withdrawClaimDeposit(uint256 epoch, Claim memory claim) external;
        function withdrawChallengeDeposit(uint256 epoch, Claim memory claim) external;
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaOutboxArbToEth {
        function challenge(uint256 epoch, Claim memory claim, address withdrawalAddress) external payable;
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IVeaOutboxArbToGnosis {
        function challenge(uint256 epoch, Claim memory claim) external;
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IWETH {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    // ========================================================================
    // Arbitrum settlement
    // ========================================================================

    #[derive(Debug)]
    #[sol(rpc)]
    interface IArbSys {
        event L2ToL1Tx(
            address caller,
            address indexed destination,
            uint256 indexed hash,
            uint256 indexed position,
            uint256 arbBlockNum,
            uint256 ethBlockNum,
            uint256 timestamp,
            uint256 callvalue,
            bytes data
        );
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface INodeInterface {
        function constructOutboxProof(uint64 size, uint64 leaf)
            external
            view
            returns (bytes32 send, bytes32 root, bytes32[] memory proof);
        function findBatchContainingBlock(uint64 blockNum) external view returns (uint64 batch);
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface ISequencerInbox {
        function batchCount() external view returns (uint256);
    }

    #[derive(Debug)]
    #[sol(rpc)]
    interface IOutbox {
        event SendRootUpdated(bytes32 indexed outputRoot, bytes32 indexed l2BlockHash);

        function isSpent(uint256 index) external view returns (bool);
        function executeTransaction(
            bytes32[] calldata proof,
            uint256 index,
            address l2Sender,
            address to,
            uint256 l2Block,
            uint256 l1Block,
            uint256 l2Timestamp,
            uint256 value,
            bytes calldata data
        ) external;
    }
}

impl From<types::Party> for Party {
    fn from(party: types::Party) -> Self {
        match party {
            types::Party::None => Party::None,
            types::Party::Claimer => Party::Claimer,
            types::Party::Challenger => Party::Challenger,
        }
    }
}

impl From<&types::Claim> for Claim {
    fn from(claim: &types::Claim) -> Self {
        Claim {
            stateRoot: claim.state_root,
            claimer: claim.claimer,
            timestampClaimed: claim.timestamp_claimed,
            timestampVerification: claim.timestamp_verification,
            blocknumberVerification: claim.blocknumber_verification,
            honest: claim.honest.into(),
            challenger: claim.challenger,
        }
    }
}
