use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// An id that does not exist in the store.
    NotFound(String),
    /// The (certificate, signer) pair already has a signature slot.
    DuplicateSignature {
        certificate_id: u64,
        signer_id: u64,
    },
    /// The (email, owner) pair already has a signer.
    DuplicateSigner {
        email: String,
        owner_id: u64,
    },
    /// The signer is still referenced by at least one signature slot.
    SignerInUse(u64),
    /// The caller is not allowed to act on this record.
    Forbidden(String),
    /// Decryption or integrity failure of an encrypted signature image.
    Crypto(String),
    /// The design JSON could not be understood at the top level.
    InvalidTemplate(String),
    /// A single participant could not be rendered.
    Render(String),
    /// The caller imposed deadline passed.
    Timeout,
    Config(String),
    Storage(String),
    LoPdfError(lopdf::Error),
    Image(image::ImageError),
    Png(String),
    Json(serde_json::Error),
    Io(std::io::Error),
    Cms(cryptographic_message_syntax::CmsError),
    X509(x509_certificate::X509CertificateError),
    TryFromIntError(std::num::TryFromIntError),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "not found: {}", what),
            Error::DuplicateSignature {
                certificate_id,
                signer_id,
            } => write!(
                f,
                "signer `{}` already has a signature on certificate `{}`",
                signer_id, certificate_id
            ),
            Error::DuplicateSigner { email, owner_id } => write!(
                f,
                "signer `{}` already exists for owner `{}`",
                email, owner_id
            ),
            Error::SignerInUse(id) => {
                write!(f, "signer `{}` is still attached to certificates", id)
            }
            Error::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            Error::Crypto(msg) => write!(f, "crypto error: {}", msg),
            Error::InvalidTemplate(msg) => write!(f, "invalid template: {}", msg),
            Error::Render(msg) => write!(f, "render error: {}", msg),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::LoPdfError(err) => write!(f, "PDF error: {}", err),
            Error::Image(err) => write!(f, "image error: {}", err),
            Error::Png(msg) => write!(f, "PNG error: {}", msg),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Cms(err) => write!(f, "CMS error: {}", err),
            Error::X509(err) => write!(f, "X.509 error: {}", err),
            Error::TryFromIntError(err) => write!(f, "{}", err),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Self::LoPdfError(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}
impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Other(err.to_owned())
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(err: std::num::TryFromIntError) -> Self {
        Error::TryFromIntError(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err)
    }
}

impl From<png::DecodingError> for Error {
    fn from(err: png::DecodingError) -> Self {
        Error::Png(err.to_string())
    }
}

impl From<png::EncodingError> for Error {
    fn from(err: png::EncodingError) -> Self {
        Error::Png(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<cryptographic_message_syntax::CmsError> for Error {
    fn from(err: cryptographic_message_syntax::CmsError) -> Self {
        Error::Cms(err)
    }
}

impl From<x509_certificate::X509CertificateError> for Error {
    fn from(err: x509_certificate::X509CertificateError) -> Self {
        Error::X509(err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Storage(format!("archive: {}", err))
    }
}
