use certificate_signing::config::{Config, OutputKind, SigningConfig};
use certificate_signing::model::{Certificate, Participant, SignatureState};
use certificate_signing::pdf_signer::PdfSigner;
use certificate_signing::store::{
    CertificateStore, MemoryCertificateStore, MemoryObjectStorage, MemoryParticipantStore,
    MemorySignatureStore, ObjectStorage, ParticipantStore, RecordingNotifier,
};
use certificate_signing::{Collaborators, Error, TemplateEngine, WorkflowCoordinator};
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::json;
use std::io::{Cursor, Read};
use std::sync::Arc;

const OWNER: u64 = 7;
const CERTIFICATE: u64 = 1;

struct Fixture {
    coordinator: WorkflowCoordinator,
    certificates: Arc<MemoryCertificateStore>,
    participants: Arc<MemoryParticipantStore>,
    storage: Arc<MemoryObjectStorage>,
    notifier: Arc<RecordingNotifier>,
}

fn config() -> Config {
    Config {
        signature_passphrase: Some("integration".to_owned()),
        verify_base_url: "https://certs.test/verify/".to_owned(),
        ..Config::default()
    }
}

fn design() -> String {
    json!({
        "width": 120, "height": 80, "background": "#fafafa",
        "objects": [
            {"type": "group", "id": "PLACEHOLDER-name", "left": 60, "top": 20, "width": 100, "height": 20,
             "objects": [
                {"type": "rect", "width": 100, "height": 20, "stroke": "#000"},
                {"type": "text", "text": "{name}"}
             ]},
            {"type": "rect", "id": "SIGNATURE-1", "left": 10, "top": 40, "width": 40, "height": 20},
            {"type": "rect", "id": "SIGNATURE-2", "left": 60, "top": 40, "width": 40, "height": 20},
            {"type": "rect", "id": "qr-anchor", "left": 100, "top": 60, "width": 16, "height": 16},
            {"type": "rect", "id": "logo-anchor", "left": 0, "top": 0, "width": 10, "height": 10,
             "stroke": "#999", "strokeDashArray": [4, 2]}
        ]
    })
    .to_string()
}

fn signature_png(color: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbaImage::from_pixel(50, 20, Rgba(color))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn fixture_with(config: Config, signer: PdfSigner) -> Fixture {
    let certificates = Arc::new(MemoryCertificateStore::new());
    let participants = Arc::new(MemoryParticipantStore::new());
    let storage = Arc::new(MemoryObjectStorage::new());
    let notifier = Arc::new(RecordingNotifier::new());

    certificates
        .save(Certificate {
            id: CERTIFICATE,
            owner_id: OWNER,
            name: "Rust for Rustaceans".to_owned(),
            design: design(),
            is_distributed: false,
            is_signed: false,
            archive_url: None,
            preview_url: None,
        })
        .unwrap();
    for (id, name) in [(11, "Ada"), (12, "Grace"), (13, "Linus")] {
        let fields = json!({"name": name}).as_object().cloned().unwrap();
        participants
            .save(Participant::new(id, CERTIFICATE, fields))
            .unwrap();
    }

    let collaborators = Collaborators {
        signatures: Arc::new(MemorySignatureStore::new()),
        certificates: certificates.clone(),
        participants: participants.clone(),
        storage: storage.clone(),
        notifier: notifier.clone(),
    };
    let engine = TemplateEngine::new(config.render.clone());
    let coordinator =
        WorkflowCoordinator::new(config, collaborators, engine, Arc::new(signer)).unwrap();
    Fixture {
        coordinator,
        certificates,
        participants,
        storage,
        notifier,
    }
}

fn fixture() -> Fixture {
    fixture_with(config(), PdfSigner::disabled())
}

#[test]
fn completion_runs_once_after_the_last_capture() {
    let f = fixture();
    let first = f.coordinator.create_signature(CERTIFICATE, 1, OWNER).unwrap();
    let second = f.coordinator.create_signature(CERTIFICATE, 2, OWNER).unwrap();
    f.coordinator.request_resign(first.id, OWNER).unwrap();

    let outcome = f
        .coordinator
        .capture_signature(first.id, &signature_png([0, 0, 200, 255]))
        .unwrap();
    assert!(!outcome.all_complete);
    assert_eq!(outcome.signature.state(), SignatureState::Signed);
    assert!(f.notifier.sent().is_empty());

    let outcome = f
        .coordinator
        .capture_signature(second.id, &signature_png([200, 0, 0, 255]))
        .unwrap();
    assert!(outcome.all_complete);

    let certificate = f.certificates.get(CERTIFICATE).unwrap().unwrap();
    assert!(certificate.is_signed);
    let preview_url = certificate.preview_url.unwrap();
    assert_eq!(preview_url, "memory://certificates/1/preview.png");
    assert!(f.storage.get(&preview_url).unwrap().starts_with(b"\x89PNG"));

    let sent = f.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].owner_id, OWNER);
    assert_eq!(sent[0].certificate_name, "Rust for Rustaceans");
    assert_eq!(sent[0].preview_path.as_deref(), Some(preview_url.as_str()));

    // A re-capture keeps the certificate complete without a second notification.
    let outcome = f
        .coordinator
        .capture_signature(second.id, &signature_png([0, 200, 0, 255]))
        .unwrap();
    assert!(outcome.all_complete);
    assert_eq!(f.notifier.sent().len(), 1);
}

#[test]
fn concurrent_last_captures_notify_once() {
    let f = fixture();
    let ids: Vec<u64> = (1..=6)
        .map(|signer| f.coordinator.create_signature(CERTIFICATE, signer, OWNER).unwrap().id)
        .collect();
    let image = signature_png([10, 10, 10, 255]);

    std::thread::scope(|scope| {
        for id in &ids {
            let coordinator = &f.coordinator;
            let image = &image;
            scope.spawn(move || coordinator.capture_signature(*id, image).unwrap());
        }
    });

    assert_eq!(f.coordinator.reconcile_all().unwrap(), 0);
    assert!(f.certificates.get(CERTIFICATE).unwrap().unwrap().is_signed);
    assert_eq!(f.notifier.sent().len(), 1);
}

#[test]
fn reconcile_completes_a_missed_certificate() {
    let f = fixture();
    let signature = f.coordinator.create_signature(CERTIFICATE, 1, OWNER).unwrap();
    // Capture straight through the ledger, skipping the completion check.
    f.coordinator
        .ledger()
        .capture(signature.id, b"opaque".to_vec())
        .unwrap();
    assert!(!f.certificates.get(CERTIFICATE).unwrap().unwrap().is_signed);

    assert_eq!(f.coordinator.reconcile_all().unwrap(), 1);
    assert!(f.certificates.get(CERTIFICATE).unwrap().unwrap().is_signed);
    assert_eq!(f.notifier.sent().len(), 1);
    assert!(f.coordinator.reconcile(CERTIFICATE).unwrap());
    assert_eq!(f.notifier.sent().len(), 1);
}

#[test]
fn certificate_without_signers_is_never_complete() {
    let f = fixture();
    assert!(!f.coordinator.reconcile(CERTIFICATE).unwrap());
    assert!(f.notifier.sent().is_empty());
}

#[test]
fn only_the_owner_attaches_and_resends() {
    let f = fixture();
    assert!(matches!(
        f.coordinator.create_signature(CERTIFICATE, 1, OWNER + 1),
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        f.coordinator.create_signature(99, 1, OWNER),
        Err(Error::NotFound(_))
    ));

    let signature = f.coordinator.create_signature(CERTIFICATE, 1, OWNER).unwrap();
    assert!(matches!(
        f.coordinator.create_signature(CERTIFICATE, 1, OWNER),
        Err(Error::DuplicateSignature { .. })
    ));
    assert!(matches!(
        f.coordinator.request_resign(signature.id, OWNER + 1),
        Err(Error::Forbidden(_))
    ));
    let requested = f.coordinator.request_resign(signature.id, OWNER).unwrap();
    assert_eq!(requested.state(), SignatureState::Requested);
}

#[test]
fn signature_images_are_private() {
    let f = fixture();
    let signature = f.coordinator.create_signature(CERTIFICATE, 1, OWNER).unwrap();
    assert!(matches!(
        f.coordinator.view_signature(signature.id, OWNER),
        Err(Error::NotFound(_))
    ));

    let image = signature_png([1, 2, 3, 255]);
    let outcome = f.coordinator.capture_signature(signature.id, &image).unwrap();
    assert_ne!(outcome.signature.encrypted_image, image);

    assert_eq!(f.coordinator.view_signature(signature.id, 1).unwrap(), image);
    assert_eq!(f.coordinator.view_signature(signature.id, OWNER).unwrap(), image);
    assert!(matches!(
        f.coordinator.view_signature(signature.id, 42),
        Err(Error::Forbidden(_))
    ));
}

#[test]
fn render_stores_artifacts_and_archive() {
    let f = fixture();
    let signature = f.coordinator.create_signature(CERTIFICATE, 1, OWNER).unwrap();
    f.coordinator
        .capture_signature(signature.id, &signature_png([0, 0, 0, 255]))
        .unwrap();

    let report = f.coordinator.render_certificates(CERTIFICATE).unwrap();
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|result| result.is_success()));
    assert!(report.results.iter().all(|result| !result.signed));

    for participant in f.participants.list_by_certificate(CERTIFICATE).unwrap() {
        let url = participant.certificate_url.unwrap();
        assert_eq!(
            url,
            format!("memory://certificates/1/certificate-{}.pdf", participant.id)
        );
        assert!(f.storage.get(&url).unwrap().starts_with(b"%PDF"));
    }

    let archive_url = report.archive_url.unwrap();
    assert_eq!(
        f.certificates.get(CERTIFICATE).unwrap().unwrap().archive_url,
        Some(archive_url.clone())
    );
    let mut archive = zip::ZipArchive::new(Cursor::new(f.storage.get(&archive_url).unwrap())).unwrap();
    assert_eq!(archive.len(), 3);
    let mut pdf = Vec::new();
    archive
        .by_name("certificate-12.pdf")
        .unwrap()
        .read_to_end(&mut pdf)
        .unwrap();
    assert!(pdf.starts_with(b"%PDF"));
}

#[test]
fn render_without_participants_has_no_archive() {
    let f = fixture();
    let certificate = Certificate {
        id: 2,
        owner_id: OWNER,
        name: "Empty".to_owned(),
        design: design(),
        is_distributed: false,
        is_signed: false,
        archive_url: None,
        preview_url: None,
    };
    f.certificates.save(certificate).unwrap();
    let report = f.coordinator.render_certificates(2).unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.archive_url, None);
}

#[test]
fn png_output_is_stored_as_png() {
    let mut config = config();
    config.render.output = OutputKind::Png;
    let f = fixture_with(config, PdfSigner::disabled());
    let report = f.coordinator.render_certificates(CERTIFICATE).unwrap();
    assert!(report.results.iter().all(|result| result
        .output
        .as_ref()
        .unwrap()
        .starts_with(b"\x89PNG")));
    assert!(f
        .storage
        .paths()
        .contains(&"certificates/1/certificate-11.png".to_owned()));
}

#[test]
fn broken_design_fails_the_render() {
    let f = fixture();
    let mut certificate = f.certificates.get(CERTIFICATE).unwrap().unwrap();
    certificate.design = "[1, 2]".to_owned();
    f.certificates.save(certificate).unwrap();
    assert!(matches!(
        f.coordinator.render_certificates(CERTIFICATE),
        Err(Error::InvalidTemplate(_))
    ));
}

#[test]
fn preview_uses_the_first_participant() {
    let f = fixture();
    let certificate = f.certificates.get(CERTIFICATE).unwrap().unwrap();
    let participants = f.participants.list_by_certificate(CERTIFICATE).unwrap();
    let preview = f
        .coordinator
        .generate_preview(&certificate, &participants, &Default::default(), None)
        .unwrap();
    let image = image::load_from_memory(&preview).unwrap();
    assert_eq!((image.width(), image.height()), (120, 80));

    let thumbnail = f.coordinator.thumbnail(CERTIFICATE).unwrap();
    assert!(thumbnail.starts_with(b"\x89PNG"));
}

#[test]
fn unsigned_pdf_passes_through_when_signing_is_disabled() {
    let f = fixture();
    let input = b"%PDF-1.7 not really".to_vec();
    assert_eq!(f.coordinator.sign_pdf(input.clone(), CERTIFICATE, 11), input);
}

#[test]
fn rendered_pdfs_are_certified_with_configured_keys() {
    let key = rcgen::KeyPair::generate().unwrap();
    let certificate = rcgen::CertificateParams::new(vec!["issuer.test".to_owned()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    let signer = PdfSigner::from_pem(
        SigningConfig {
            enabled: true,
            ..SigningConfig::default()
        },
        certificate.pem().as_bytes(),
        key.serialize_pem().as_bytes(),
    )
    .unwrap();
    let f = fixture_with(config(), signer);

    let report = f.coordinator.render_certificates(CERTIFICATE).unwrap();
    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert!(result.signed);
        let text = String::from_utf8_lossy(result.output.as_ref().unwrap()).into_owned();
        assert!(text.contains("/DocMDP"));
        assert!(!text.contains("/ByteRange[0 10000 20000 10000]"));
    }

    // A certified PDF is not certified again, the input comes back.
    let signed = report.results[0].output.clone().unwrap();
    assert_eq!(f.coordinator.sign_pdf(signed.clone(), CERTIFICATE, 11), signed);
}
