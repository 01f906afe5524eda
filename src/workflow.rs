//! Ties the ledger, the codec, rendering and signing together.
//!
//! The certificate level "fully signed" transition is evaluated after each
//! capture is committed. Only the call that flips the certificate runs the
//! follow-up work (preview, notification), and failures there are logged,
//! never returned. [`WorkflowCoordinator::reconcile_all`] re-runs the check
//! for certificates whose completion was missed by concurrent captures.

use crate::batch::{BatchJob, BatchRenderer};
use crate::codec::SignatureCodec;
use crate::config::{Config, OutputKind};
use crate::design::Design;
use crate::ledger::SignatureLedger;
use crate::model::{
    Certificate, CertificateId, Participant, ParticipantId, RenderResult, Signature, SignatureId,
    SignerId, UserId,
};
use crate::pdf_signer::PdfSigner;
use crate::qr;
use crate::store::{CertificateStore, Notifier, ObjectStorage, ParticipantStore, SignatureStore};
use crate::template_engine::{RenderAssets, TemplateEngine};
use crate::Error;
use serde_json::Map;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Instant;

/// Persistence, storage and notification backends.
#[derive(Clone)]
pub struct Collaborators {
    pub signatures: Arc<dyn SignatureStore>,
    pub certificates: Arc<dyn CertificateStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub signature: Signature,
    /// Every signature of the certificate is signed.
    pub all_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub results: Vec<RenderResult>,
    /// Zip of every successful artifact, when there is at least one.
    pub archive_url: Option<String>,
}

pub struct WorkflowCoordinator {
    ledger: SignatureLedger,
    certificates: Arc<dyn CertificateStore>,
    participants: Arc<dyn ParticipantStore>,
    storage: Arc<dyn ObjectStorage>,
    notifier: Arc<dyn Notifier>,
    codec: SignatureCodec,
    engine: TemplateEngine,
    signer: Arc<PdfSigner>,
    watermark: Option<Vec<u8>>,
    config: Config,
}

impl WorkflowCoordinator {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        engine: TemplateEngine,
        signer: Arc<PdfSigner>,
    ) -> Result<Self, Error> {
        let codec = SignatureCodec::new(&config.signature_key()?);
        let watermark = config.load_watermark()?;
        Ok(WorkflowCoordinator {
            ledger: SignatureLedger::new(collaborators.signatures),
            certificates: collaborators.certificates,
            participants: collaborators.participants,
            storage: collaborators.storage,
            notifier: collaborators.notifier,
            codec,
            engine,
            signer,
            watermark,
            config,
        })
    }

    /// Build the engine and the signer from `config` as well.
    pub fn from_config(config: Config, collaborators: Collaborators) -> Result<Self, Error> {
        let engine = TemplateEngine::from_config(&config.render)?;
        let signer = Arc::new(PdfSigner::from_config(&config.signing)?);
        Self::new(config, collaborators, engine, signer)
    }

    pub fn with_watermark(mut self, watermark: Vec<u8>) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn ledger(&self) -> &SignatureLedger {
        &self.ledger
    }

    /// Attach a signer to a certificate. Only the certificate owner may.
    pub fn create_signature(
        &self,
        certificate_id: CertificateId,
        signer_id: SignerId,
        creator_id: UserId,
    ) -> Result<Signature, Error> {
        let certificate = self.certificate(certificate_id)?;
        if certificate.owner_id != creator_id {
            return Err(Error::Forbidden(format!(
                "certificate `{}` belongs to another user",
                certificate_id
            )));
        }
        self.ledger.create(certificate_id, signer_id, creator_id)
    }

    /// Refresh the request of a signature. Sending it is up to the caller.
    pub fn request_resign(
        &self,
        signature_id: SignatureId,
        caller_id: UserId,
    ) -> Result<Signature, Error> {
        let signature = self.ledger.fetch(signature_id)?;
        if signature.created_by != caller_id {
            return Err(Error::Forbidden(format!(
                "signature `{}` was requested by another user",
                signature_id
            )));
        }
        self.ledger.request(signature_id)
    }

    /// Encrypt and store a signature image, then check the certificate.
    pub fn capture_signature(
        &self,
        signature_id: SignatureId,
        raw_image: &[u8],
    ) -> Result<CaptureOutcome, Error> {
        let encrypted = self.codec.encrypt(raw_image)?;
        let signature = self.ledger.capture(signature_id, encrypted)?;

        // The capture is committed. From here on nothing fails the signer.
        let all_complete = match self.evaluate_completion(signature.certificate_id) {
            Ok(complete) => complete,
            Err(err) => {
                log::error!(
                    "Completion check of certificate `{}` failed: {}",
                    signature.certificate_id,
                    err
                );
                false
            }
        };
        Ok(CaptureOutcome {
            signature,
            all_complete,
        })
    }

    /// Decrypted signature image, for its signer or its creator only.
    pub fn view_signature(
        &self,
        signature_id: SignatureId,
        caller_id: UserId,
    ) -> Result<Vec<u8>, Error> {
        let signature = self.ledger.fetch(signature_id)?;
        if signature.signer_id != caller_id && signature.created_by != caller_id {
            return Err(Error::Forbidden(format!(
                "signature `{}` is not visible to `{}`",
                signature_id, caller_id
            )));
        }
        if !signature.is_signed || signature.encrypted_image.is_empty() {
            return Err(Error::NotFound(format!(
                "image of signature `{}`",
                signature_id
            )));
        }
        self.codec.decrypt(&signature.encrypted_image)
    }

    /// Re-run the completion check. Returns whether the certificate is complete.
    pub fn reconcile(&self, certificate_id: CertificateId) -> Result<bool, Error> {
        self.evaluate_completion(certificate_id)
    }

    /// Reconcile every unsigned certificate. Returns how many completed.
    pub fn reconcile_all(&self) -> Result<usize, Error> {
        let mut completed = 0;
        for certificate in self.certificates.list_unsigned()? {
            match self.evaluate_completion(certificate.id) {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(err) => log::error!(
                    "Reconciling certificate `{}` failed: {}",
                    certificate.id,
                    err
                ),
            }
        }
        if completed > 0 {
            log::info!("Reconciliation completed {} certificates.", completed);
        }
        Ok(completed)
    }

    /// Render, store and archive the certificates of every participant.
    pub fn render_certificates(&self, certificate_id: CertificateId) -> Result<RenderReport, Error> {
        let deadline = Instant::now() + self.config.pipeline_timeout();
        let certificate = self.certificate(certificate_id)?;
        let participants = self.participants.list_by_certificate(certificate_id)?;
        let design = Design::parse(&certificate.design)?;
        let signatures = self.decrypt_signatures(certificate_id)?;

        let job = BatchJob {
            certificate_id,
            design: &design,
            signatures: Some(&signatures),
            watermark: self.watermark.as_deref(),
            images: None,
            verify_base_url: &self.config.verify_base_url,
        };
        let signer = Arc::clone(&self.signer);
        let mut results = BatchRenderer::new(&self.engine, signer, &self.config.batch)
            .with_deadline(deadline)
            .render_all(&job, &participants)?;
        drop(signatures);

        let extension = match self.engine.options().output {
            OutputKind::Png => "png",
            OutputKind::Pdf => "pdf",
        };
        let mut archive_entries = Vec::new();
        for result in results.iter_mut() {
            let output = match &result.output {
                Some(output) if result.is_success() => output,
                _ => continue,
            };
            let name = format!("certificate-{}.{}", result.participant_id, extension);
            match self.store_artifact(certificate_id, result.participant_id, &name, output) {
                Ok(()) => archive_entries.push(name),
                Err(err) => {
                    log::error!(
                        "Storing the certificate of participant `{}` failed: {}",
                        result.participant_id,
                        err
                    );
                    *result = RenderResult::failure(result.participant_id, err.to_string());
                }
            }
        }

        let archive_url = if archive_entries.is_empty() {
            None
        } else {
            let archive = build_archive(&results)?;
            let path = format!("certificates/{}/certificates.zip", certificate_id);
            let url = self.storage.put(archive, &path)?;
            self.certificates.set_archive_url(certificate_id, &url)?;
            Some(url)
        };
        log::info!(
            "Rendered {} of {} certificates for `{}`.",
            archive_entries.len(),
            results.len(),
            certificate_id
        );
        Ok(RenderReport {
            results,
            archive_url,
        })
    }

    /// Preview of the design with the first participant as sample data.
    pub fn generate_preview(
        &self,
        certificate: &Certificate,
        participants: &[Participant],
        signatures: &HashMap<String, Vec<u8>>,
        watermark: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        let design = Design::parse(&certificate.design)?;
        let sample = participants.first();
        let empty = Map::new();
        let fields = sample.map(|participant| &participant.fields).unwrap_or(&empty);
        let qr_code = match sample {
            Some(participant) => Some(qr::render_png(
                &qr::verification_url(&self.config.verify_base_url, participant.id),
                self.engine.options().qr_module_px,
            )?),
            None => None,
        };
        let assets = RenderAssets {
            qr_code: qr_code.as_deref(),
            signatures: Some(signatures),
            watermark,
            images: None,
        };
        self.engine.preview(&design, fields, assets)
    }

    /// Participant independent thumbnail of a certificate design.
    pub fn thumbnail(&self, certificate_id: CertificateId) -> Result<Vec<u8>, Error> {
        self.engine.thumbnail(&self.certificate(certificate_id)?.design)
    }

    /// Certify a PDF. Never fails, returns the input when signing is not possible.
    pub fn sign_pdf(
        &self,
        pdf: Vec<u8>,
        certificate_id: CertificateId,
        participant_id: ParticipantId,
    ) -> Vec<u8> {
        let timeout = self.config.signing.timeout();
        self.signer
            .sign_with_timeout(pdf, certificate_id, participant_id, timeout)
            .0
    }

    fn certificate(&self, certificate_id: CertificateId) -> Result<Certificate, Error> {
        self.certificates
            .get(certificate_id)?
            .ok_or_else(|| Error::NotFound(format!("certificate `{}`", certificate_id)))
    }

    fn evaluate_completion(&self, certificate_id: CertificateId) -> Result<bool, Error> {
        if !self.ledger.all_signed(certificate_id)? {
            return Ok(false);
        }
        if self.certificates.mark_signed(certificate_id)? {
            log::info!("Certificate `{}` is signed by every signer.", certificate_id);
            self.on_completed(certificate_id);
        }
        Ok(true)
    }

    /// Follow-up work of the call that completed the certificate.
    fn on_completed(&self, certificate_id: CertificateId) {
        let certificate = match self.certificate(certificate_id) {
            Ok(certificate) => certificate,
            Err(err) => {
                log::error!("Completed certificate `{}` not loaded: {}", certificate_id, err);
                return;
            }
        };

        let preview_url = match self.store_preview(&certificate) {
            Ok(url) => Some(url),
            Err(err) => {
                log::error!("Preview of certificate `{}` failed: {}", certificate_id, err);
                None
            }
        };

        if let Err(err) = self.notifier.notify(
            certificate.owner_id,
            &certificate.name,
            certificate.id,
            preview_url.as_deref(),
        ) {
            log::error!(
                "Notifying the owner of certificate `{}` failed: {}",
                certificate_id,
                err
            );
        }
    }

    fn store_preview(&self, certificate: &Certificate) -> Result<String, Error> {
        let participants = self.participants.list_by_certificate(certificate.id)?;
        let signatures = self.decrypt_signatures(certificate.id)?;
        let preview = self.generate_preview(
            certificate,
            &participants,
            &signatures,
            self.watermark.as_deref(),
        )?;
        let url = self
            .storage
            .put(preview, &format!("certificates/{}/preview.png", certificate.id))?;
        self.certificates.set_preview_url(certificate.id, &url)?;
        Ok(url)
    }

    /// Signature images of one certificate keyed by signer id, freshly decrypted.
    fn decrypt_signatures(
        &self,
        certificate_id: CertificateId,
    ) -> Result<HashMap<String, Vec<u8>>, Error> {
        let mut images = HashMap::new();
        for signature in self.ledger.list_by_certificate(certificate_id)? {
            if !signature.is_signed || signature.encrypted_image.is_empty() {
                continue;
            }
            let image = self.codec.decrypt(&signature.encrypted_image)?;
            images.insert(signature.signer_id.to_string(), image);
        }
        Ok(images)
    }

    fn store_artifact(
        &self,
        certificate_id: CertificateId,
        participant_id: ParticipantId,
        name: &str,
        output: &[u8],
    ) -> Result<(), Error> {
        let path = format!("certificates/{}/{}", certificate_id, name);
        let url = self.storage.put(output.to_vec(), &path)?;
        self.participants.set_certificate_url(participant_id, &url)
    }
}

/// Zip of every successful result, named after the participant.
fn build_archive(results: &[RenderResult]) -> Result<Vec<u8>, Error> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for result in results {
        if let (true, Some(output)) = (result.is_success(), &result.output) {
            let extension = if output.starts_with(b"%PDF") { "pdf" } else { "png" };
            writer.start_file(
                format!("certificate-{}.{}", result.participant_id, extension),
                options,
            )?;
            writer.write_all(output)?;
        }
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn archive_contains_only_successes() {
        let results = vec![
            RenderResult::success(1, b"%PDF-1.7 one".to_vec(), false),
            RenderResult::failure(2, "broken".to_owned()),
            RenderResult::success(3, vec![0x89, b'P', b'N', b'G'], false),
        ];
        let archive = build_archive(&results).unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        assert_eq!(zip.len(), 2);

        let mut content = Vec::new();
        zip.by_name("certificate-1.pdf")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"%PDF-1.7 one");
        assert!(zip.by_name("certificate-3.png").is_ok());
    }
}
