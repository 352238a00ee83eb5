use arca_base::CodecError;

/// Rejection reasons for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("account {0} not found")]
    UnknownAccount(u32),

    #[error("account {account}: balance {balance} cannot cover {needed}")]
    InsufficientBalance {
        account: u32,
        balance: u64,
        needed: u64,
    },

    #[error("account {account}: operation id {actual}, expected {expected}")]
    StaleOpId {
        account: u32,
        expected: u32,
        actual: u32,
    },

    #[error("account {0}: transfer to itself")]
    SelfTransfer(u32),

    #[error("account {0}: signature does not verify")]
    BadSignature(u32),

    #[error("malformed public key")]
    MalformedKey,

    #[error("account {0}: declared public key does not match the account key")]
    KeyMismatch(u32),
}

/// Rejection reasons for a whole block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("block {actual} out of order, expected {expected}")]
    OutOfOrderBlock { expected: u32, actual: u32 },

    #[error("block {0} already applied")]
    DuplicateBlock(u32),

    #[error("block {0}: operations hash does not match header")]
    OperationsHashMismatch(u32),

    #[error("block {index}: declared fee {declared} != operations total {actual}")]
    FeeMismatch {
        index: u32,
        declared: u64,
        actual: u64,
    },

    #[error("block {0}: prev safebox hash does not match local state")]
    SafeboxHashMismatch(u32),

    #[error("malformed block header: {0}")]
    MalformedHeader(&'static str),

    #[error("operation rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
