use arbx_primitives::{Chain, FlashLoanProtocol};

/// Request validation failures.
///
/// Each variant renders with a stable, machine-readable code prefix so
/// downstream log processors can key on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Request targets a different chain than the provider serves.
    #[error("CHAIN_MISMATCH: request chain {request} does not match provider chain {provider}")]
    ChainMismatch {
        /// Chain on the request.
        request: Chain,
        /// Chain the provider serves.
        provider: Chain,
    },
    /// Asset is not a well-formed address.
    #[error("INVALID_ASSET: {0}")]
    InvalidAsset(String),
    /// Loan amount is zero.
    #[error("ZERO_AMOUNT: loan amount must be positive")]
    ZeroAmount,
    /// Swap path has no steps.
    #[error("EMPTY_PATH: swap path has no steps")]
    EmptyPath,
    /// A step's router is not a well-formed address.
    #[error("INVALID_ROUTER: step {index} router {router}")]
    InvalidRouter {
        /// Index of the offending step.
        index: usize,
        /// The malformed router string.
        router: String,
    },
    /// A step's router is not in the provider's approved set.
    #[error("UNAPPROVED_ROUTER: step {index} router {router}")]
    UnapprovedRouter {
        /// Index of the offending step.
        index: usize,
        /// The rejected router.
        router: String,
    },
    /// The path does not end in its input token.
    #[error("INVALID_CYCLE: first step input {first_in} does not match last step output {last_out}")]
    InvalidCycle {
        /// First step's input token.
        first_in: String,
        /// Last step's output token.
        last_out: String,
    },
    /// The borrowed asset is not the path's input token.
    #[error("ASSET_MISMATCH: asset {asset} does not match first step input {first_in}")]
    AssetMismatch {
        /// Borrowed asset.
        asset: String,
        /// First step's input token.
        first_in: String,
    },
    /// DAI flash mint only lends DAI.
    #[error("ASSET_NOT_DAI: {0}")]
    AssetNotDai(String),
    /// The protocol does not operate on the requested chain.
    #[error("CHAIN_NOT_SUPPORTED: {protocol} is not available on {chain}")]
    ChainNotSupported {
        /// Protocol rejecting the chain.
        protocol: FlashLoanProtocol,
        /// The rejected chain.
        chain: Chain,
    },
    /// The configured protocol has no execution support.
    #[error("UNSUPPORTED_PROTOCOL: {0}")]
    UnsupportedProtocol(String),
    /// The provider is misconfigured and fails closed.
    #[error("CONFIG: {0}")]
    Config(String),
}

impl ValidationError {
    /// The stable code prefix of this error.
    pub const fn code(&self) -> &'static str {
        match self {
            ValidationError::ChainMismatch { .. } => "CHAIN_MISMATCH",
            ValidationError::InvalidAsset(_) => "INVALID_ASSET",
            ValidationError::ZeroAmount => "ZERO_AMOUNT",
            ValidationError::EmptyPath => "EMPTY_PATH",
            ValidationError::InvalidRouter { .. } => "INVALID_ROUTER",
            ValidationError::UnapprovedRouter { .. } => "UNAPPROVED_ROUTER",
            ValidationError::InvalidCycle { .. } => "INVALID_CYCLE",
            ValidationError::AssetMismatch { .. } => "ASSET_MISMATCH",
            ValidationError::AssetNotDai(_) => "ASSET_NOT_DAI",
            ValidationError::ChainNotSupported { .. } => "CHAIN_NOT_SUPPORTED",
            ValidationError::UnsupportedProtocol(_) => "UNSUPPORTED_PROTOCOL",
            ValidationError::Config(_) => "CONFIG",
        }
    }
}

/// Error from the RPC seam providers use for gas estimation and pool
/// discovery.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rpc call: {0}")]
pub struct RpcCallError(pub String);

/// Failures building calldata or transactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The request failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No flash pool exists for the requested pair on any fee tier.
    #[error("MISSING_POOL: no pool for {token_a}/{token_b}")]
    MissingPool {
        /// One side of the pair.
        token_a: String,
        /// Other side of the pair.
        token_b: String,
    },
    /// The protocol's execution path is not implemented.
    #[error("NOT_IMPLEMENTED: {0} execution is not implemented")]
    NotImplemented(FlashLoanProtocol),
    /// An underlying RPC call failed.
    #[error(transparent)]
    Rpc(#[from] RpcCallError),
}
