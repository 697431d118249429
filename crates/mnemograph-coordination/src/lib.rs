//! Mnemograph coordination — claims, staleness, task hooks

pub mod claims;

pub use claims::{
    AgentStatus, ClaimRequest, ClaimResult, ConflictInfo, CoordinationEngine, Overview,
    CLAIM_TTL_HOURS,
};
