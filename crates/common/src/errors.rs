//! Error Types for the CDP Engine
//!
//! Typed errors with stable codes for logging and a recoverability
//! classifier. Validation and not-found errors are recoverable by the
//! caller; invariant violations are fatal and must never be retried.

use thiserror::Error;

use crate::types::Brand;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Main error enum for all engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // ============ Amount Errors ============
    /// Operation mixed two different token brands
    #[error("brand mismatch: expected {expected}, got {actual}")]
    BrandMismatch { expected: Brand, actual: Brand },

    /// Arithmetic overflow
    #[error("arithmetic overflow")]
    Overflow,

    /// An account held less than the operation required
    #[error("insufficient {brand}: available {available}, requested {requested}")]
    InsufficientFunds {
        brand: Brand,
        available: u64,
        requested: u64,
    },

    // ============ Validation Errors ============
    /// Collateral brand is not registered with the director
    #[error("unsupported collateral type {brand}")]
    UnsupportedCollateral { brand: Brand },

    /// A manager already exists for this collateral brand
    #[error("collateral type {brand} has already been added")]
    DuplicateCollateralType { brand: Brand },

    /// Collateral keyword failed naming rules
    #[error("invalid collateral keyword {keyword:?}")]
    InvalidKeyword { keyword: String },

    /// Governance parameter bundle failed validation
    #[error("malformed parameter bundle: {reason}")]
    InvalidParams { reason: &'static str },

    /// Requested debt below the director's minimum initial debt
    #[error("requested debt {requested} is below the minimum {minimum}")]
    DebtBelowMinimum { requested: u64, minimum: u64 },

    /// Minting would push total debt over the governed limit
    #[error("debt limit exceeded: total would be {requested}, limit {limit}")]
    DebtLimitExceeded { requested: u64, limit: u64 },

    /// A vault operation was given empty collateral
    #[error("collateral must be non-empty")]
    ZeroCollateral,

    /// The vault is not in the Active phase
    #[error("vault {vault_id} is not active")]
    VaultNotActive { vault_id: String },

    /// The index already holds a live key for this vault
    #[error("duplicate key {key}")]
    DuplicateKey { key: String },

    // ============ Not-Found Errors ============
    /// No entry in the ordered index for this key
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// No vault registered under this id
    #[error("vault {vault_id} not found")]
    VaultNotFound { vault_id: String },

    /// A composite key could not be decoded
    #[error("malformed composite key: {reason}")]
    KeyDecode { reason: &'static str },

    // ============ Settlement Errors ============
    /// A reallocation would create or destroy value for a brand
    #[error("unbalanced reallocation of {brand}: inflow {inflow}, outflow {outflow}")]
    ReallocationUnbalanced {
        brand: Brand,
        inflow: u64,
        outflow: u64,
    },

    // ============ Collaborator Errors ============
    /// No liquidator has been installed for the manager
    #[error("no liquidator installed")]
    LiquidatorNotInstalled,

    /// The external liquidator reported a failure
    #[error("liquidator failure: {reason}")]
    LiquidatorFailure { reason: String },

    /// The price oracle could not produce a quote
    #[error("oracle failure: {reason}")]
    OracleFailure { reason: String },

    /// The shortfall-reporting invitation could not be resolved
    #[error("shortfall resolution failure: {reason}")]
    ShortfallResolution { reason: String },

    // ============ Invariant Violations (fatal) ============
    /// A settlement staging area still held tokens after an operation
    #[error("staging area {seat} not drained: {remaining} {brand} remaining")]
    StageNotDrained {
        seat: String,
        brand: Brand,
        remaining: u64,
    },

    /// A vault with empty collateral reached the priority structure
    #[error("vault {vault_id} has no collateral and cannot be tracked")]
    EmptyCollateral { vault_id: String },

    /// The rollback burn after a failed settlement itself failed
    #[error("settlement rollback failed: {detail}")]
    RollbackFailed { detail: String },
}

impl EngineError {
    /// Returns a stable error code for logging and metrics
    pub fn code(&self) -> &'static str {
        match self {
            Self::BrandMismatch { .. } => "E001_BRAND_MISMATCH",
            Self::Overflow => "E002_OVERFLOW",
            Self::InsufficientFunds { .. } => "E003_INSUFFICIENT_FUNDS",
            Self::UnsupportedCollateral { .. } => "E010_UNSUPPORTED_COLLATERAL",
            Self::DuplicateCollateralType { .. } => "E011_DUPLICATE_COLLATERAL",
            Self::InvalidKeyword { .. } => "E012_INVALID_KEYWORD",
            Self::InvalidParams { .. } => "E013_INVALID_PARAMS",
            Self::DebtBelowMinimum { .. } => "E014_DEBT_BELOW_MIN",
            Self::DebtLimitExceeded { .. } => "E015_DEBT_LIMIT",
            Self::ZeroCollateral => "E016_ZERO_COLLATERAL",
            Self::VaultNotActive { .. } => "E017_VAULT_NOT_ACTIVE",
            Self::DuplicateKey { .. } => "E018_DUPLICATE_KEY",
            Self::KeyNotFound { .. } => "E020_KEY_NOT_FOUND",
            Self::VaultNotFound { .. } => "E021_VAULT_NOT_FOUND",
            Self::KeyDecode { .. } => "E022_KEY_DECODE",
            Self::ReallocationUnbalanced { .. } => "E030_REALLOC_UNBALANCED",
            Self::LiquidatorNotInstalled => "E040_NO_LIQUIDATOR",
            Self::LiquidatorFailure { .. } => "E041_LIQUIDATOR_FAILURE",
            Self::OracleFailure { .. } => "E042_ORACLE_FAILURE",
            Self::ShortfallResolution { .. } => "E043_SHORTFALL_RESOLUTION",
            Self::StageNotDrained { .. } => "E090_STAGE_NOT_DRAINED",
            Self::EmptyCollateral { .. } => "E091_EMPTY_COLLATERAL",
            Self::RollbackFailed { .. } => "E092_ROLLBACK_FAILED",
        }
    }

    /// Returns true if the caller can recover from this error.
    ///
    /// Invariant violations return false: they must halt the enclosing
    /// operation and are never retried automatically.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::StageNotDrained { .. }
                | Self::EmptyCollateral { .. }
                | Self::RollbackFailed { .. }
        )
    }
}
