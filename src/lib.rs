//! Multi-party signing of certificates.
//!
//! Signers approve a certificate by capturing a signature image, which is
//! stored encrypted. Once every signer approved, the certificate design is
//! rendered for each participant with the signatures, a QR code and a
//! watermark composited in, and every PDF gets a certification signature
//! when key material is configured.

mod acro_form;
mod byte_range;
mod digitally_sign;
mod error;
mod image_xobject;
mod pdf_object;
mod signature_info;

pub mod batch;
pub mod codec;
pub mod color;
pub mod config;
pub mod design;
pub mod ledger;
pub mod model;
pub mod pdf_export;
pub mod pdf_signer;
pub mod qr;
pub mod rasterize;
pub mod signer;
pub mod store;
pub mod template_engine;
pub mod workflow;

pub use codec::{SignatureCodec, SignatureKey};
pub use config::Config;
pub use error::Error;
pub use ledger::SignatureLedger;
pub use pdf_signer::{PdfSigner, SigningOutcome};
pub use template_engine::TemplateEngine;
pub use workflow::{CaptureOutcome, Collaborators, RenderReport, WorkflowCoordinator};

pub use lopdf;
