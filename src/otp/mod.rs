//! One-time verification codes.

pub mod code;
pub mod model;
pub mod service;

pub use model::{
    ChannelOutcome, CleanupReport, DeliveryMethod, IssuanceLedger, IssueRequest, IssueResult,
    OtpRecord, OtpStats, Purpose, PurposeStats, VerifyResult,
};
pub use service::OtpService;
