//! Payment provider webhooks: signature verification, payload normalization
//! and the processing pipeline that reconciles payments with orders.

pub mod payload;
pub mod processor;
pub mod signature;

pub use payload::{ParseError, ProviderPayload, parse};
pub use processor::{IgnoreReason, WebhookOutcome, WebhookProcessor, WebhookSecrets};
pub use signature::{
    SignatureEncoding, compute_signature, decode_signature, format_signature, signature_header,
    verify_signature,
};
