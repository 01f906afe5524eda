//! Renders every participant of a certificate with bounded parallelism.
//!
//! Participants are split into batches. Items of one batch render on scoped
//! threads, batches run one after another, so at most one batch of canvases
//! is alive at a time.

use crate::config::{BatchConfig, OutputKind};
use crate::design::Design;
use crate::model::{CertificateId, Participant, ParticipantId, RenderResult};
use crate::pdf_export::png_to_pdf;
use crate::pdf_signer::PdfSigner;
use crate::qr;
use crate::template_engine::{RenderAssets, TemplateEngine};
use crate::Error;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// PDF points per design pixel (72 dpi over 96 dpi).
const POINTS_PER_PIXEL: f64 = 0.75;

/// Number of participants rendered at once for a run of `total`.
pub fn batch_width(total: usize, max_width: usize) -> usize {
    let width = match total {
        0..=8 => total,
        9..=100 => 8,
        101..=1000 => 6,
        _ => 4,
    };
    width.min(max_width).max(1)
}

/// Everything shared by all participants of one certificate.
#[derive(Debug, Clone, Copy)]
pub struct BatchJob<'a> {
    pub certificate_id: CertificateId,
    pub design: &'a Design,
    /// Decrypted signatures keyed by signer id.
    pub signatures: Option<&'a HashMap<String, Vec<u8>>>,
    pub watermark: Option<&'a [u8]>,
    pub images: Option<&'a HashMap<String, Vec<u8>>>,
    pub verify_base_url: &'a str,
}

pub struct BatchRenderer<'a> {
    engine: &'a TemplateEngine,
    signer: Arc<PdfSigner>,
    sign_timeout: Duration,
    output: OutputKind,
    max_width: usize,
    deadline: Option<Instant>,
}

impl<'a> BatchRenderer<'a> {
    /// Each PDF is signed within the signer's configured timeout.
    pub fn new(engine: &'a TemplateEngine, signer: Arc<PdfSigner>, config: &BatchConfig) -> Self {
        BatchRenderer {
            engine,
            sign_timeout: signer.config().timeout(),
            signer,
            output: engine.options().output,
            max_width: config.max_width,
            deadline: None,
        }
    }

    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    /// Fail with [`Error::Timeout`] when `deadline` passes before the last batch is done.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// One result per participant. Order is not guaranteed.
    pub fn render_all(
        &self,
        job: &BatchJob,
        participants: &[Participant],
    ) -> Result<Vec<RenderResult>, Error> {
        log::info!(
            "Rendering {} participants of certificate `{}`.",
            participants.len(),
            job.certificate_id
        );
        let width = batch_width(participants.len(), self.max_width);
        let results = run_batches(participants, width, self.deadline, |participant| {
            self.render_one(job, participant)
        })?;
        let failed = results.iter().filter(|result| !result.is_success()).count();
        if failed > 0 {
            log::warn!(
                "{} of {} participants of certificate `{}` failed to render.",
                failed,
                results.len(),
                job.certificate_id
            );
        }
        Ok(results)
    }

    fn render_one(&self, job: &BatchJob, participant: &Participant) -> Result<RenderResult, Error> {
        let url = qr::verification_url(job.verify_base_url, participant.id);
        let qr_code = match qr::render_png(&url, self.engine.options().qr_module_px) {
            Ok(qr_code) => Some(qr_code),
            Err(err) => {
                log::warn!("No QR code for participant `{}`: {}", participant.id, err);
                None
            }
        };
        let assets = RenderAssets {
            qr_code: qr_code.as_deref(),
            signatures: job.signatures,
            watermark: job.watermark,
            images: job.images,
        };
        let png = self.engine.render(job.design, &participant.fields, assets)?;

        match self.output {
            OutputKind::Png => Ok(RenderResult::success(participant.id, png, false)),
            OutputKind::Pdf => {
                let (width, height) = job.design.canvas_size();
                let pdf = png_to_pdf(&png, width * POINTS_PER_PIXEL, height * POINTS_PER_PIXEL)?;
                let (pdf, outcome) = self.signer.sign_with_timeout(
                    pdf,
                    job.certificate_id,
                    participant.id,
                    self.sign_timeout,
                );
                Ok(RenderResult::success(participant.id, pdf, outcome.is_signed()))
            }
        }
    }
}

/// Run `render` for every participant, `width` at a time.
/// Errors and panics of one item become a failed result for that item.
pub(crate) fn run_batches<F>(
    participants: &[Participant],
    width: usize,
    deadline: Option<Instant>,
    render: F,
) -> Result<Vec<RenderResult>, Error>
where
    F: Fn(&Participant) -> Result<RenderResult, Error> + Sync,
{
    let past_deadline = |done: usize| match deadline {
        Some(deadline) if Instant::now() >= deadline => {
            log::warn!(
                "Render deadline passed with {} of {} participants done.",
                done,
                participants.len()
            );
            true
        }
        _ => false,
    };

    let mut results = Vec::with_capacity(participants.len());
    for batch in participants.chunks(width.max(1)) {
        if past_deadline(results.len()) {
            return Err(Error::Timeout);
        }

        let render = &render;
        let batch_results: Vec<RenderResult> = std::thread::scope(|scope| {
            let handles: Vec<(ParticipantId, _)> = batch
                .iter()
                .map(|participant| {
                    let handle =
                        scope.spawn(move || render(participant).map_err(|err| err.to_string()));
                    (participant.id, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(participant_id, handle)| match handle.join() {
                    Ok(Ok(result)) => result,
                    Ok(Err(err)) => RenderResult::failure(participant_id, err),
                    Err(_) => RenderResult::failure(
                        participant_id,
                        "render panicked".to_owned(),
                    ),
                })
                .collect()
        });
        results.extend(batch_results);
    }
    // A batch that overran the deadline discards the whole run.
    if !participants.is_empty() && past_deadline(results.len()) {
        return Err(Error::Timeout);
    }
    Ok(results)
}
