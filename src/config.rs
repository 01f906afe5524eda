//! Runtime configuration.
//!
//! Loaded from a JSON file or from `CERTSIGN_*` environment variables.
//! Every field has a default so a partial file is enough.

use crate::codec::SignatureKey;
use crate::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Base64 encoded 32 byte key for signature images.
    pub signature_key: Option<String>,
    /// Used when `signature_key` is not set.
    pub signature_passphrase: Option<String>,
    /// Prefix of the link encoded in each participant's QR code.
    pub verify_base_url: String,
    pub watermark_path: Option<PathBuf>,
    /// Upper bound for rendering and signing a whole certificate batch.
    pub pipeline_timeout_secs: u64,
    pub render: RenderConfig,
    pub batch: BatchConfig,
    pub signing: SigningConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            signature_key: None,
            signature_passphrase: None,
            verify_base_url: "https://localhost/verify".to_owned(),
            watermark_path: None,
            pipeline_timeout_secs: 120,
            render: RenderConfig::default(),
            batch: BatchConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Png,
    Pdf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    /// Supersampling factor of the full render.
    pub multiplier: f64,
    /// Scale of the owner preview.
    pub preview_multiplier: f64,
    /// Thumbnails fit in a square of this many pixels.
    pub thumbnail_max: u32,
    /// TrueType/OpenType font used for text objects.
    pub font_path: Option<PathBuf>,
    pub output: OutputKind,
    /// Pixel size of one QR module.
    pub qr_module_px: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            multiplier: 2.0,
            preview_multiplier: 1.0,
            thumbnail_max: 600,
            font_path: None,
            output: OutputKind::Pdf,
            qr_module_px: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchConfig {
    /// Hard cap on renders in flight at once.
    pub max_width: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig { max_width: 8 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigningConfig {
    pub enabled: bool,
    /// PEM encoded X.509 certificate.
    pub certificate_path: Option<PathBuf>,
    /// PEM encoded private key, PKCS#8 or PKCS#1.
    pub private_key_path: Option<PathBuf>,
    pub signer_name: String,
    pub reason: String,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        SigningConfig {
            enabled: false,
            certificate_path: None,
            private_key_path: None,
            signer_name: "Certificate Issuer".to_owned(),
            reason: "Certificate issued".to_owned(),
            location: None,
            contact_info: None,
            timeout_secs: 60,
        }
    }
}

impl SigningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `CERTSIGN_*` variables given by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let var = |name: &str| lookup(&format!("CERTSIGN_{}", name)).filter(|v| !v.is_empty());

        config.signature_key = var("SIGNATURE_KEY");
        config.signature_passphrase = var("SIGNATURE_PASSPHRASE");
        if let Some(url) = var("VERIFY_BASE_URL") {
            config.verify_base_url = url;
        }
        config.watermark_path = var("WATERMARK_PATH").map(PathBuf::from);
        if let Some(secs) = var("PIPELINE_TIMEOUT_SECS") {
            config.pipeline_timeout_secs = parse_var("PIPELINE_TIMEOUT_SECS", &secs)?;
        }

        config.render.font_path = var("FONT_PATH").map(PathBuf::from);
        if let Some(multiplier) = var("RENDER_MULTIPLIER") {
            config.render.multiplier = parse_var("RENDER_MULTIPLIER", &multiplier)?;
        }
        if let Some(output) = var("OUTPUT") {
            config.render.output = match output.to_ascii_lowercase().as_str() {
                "png" => OutputKind::Png,
                "pdf" => OutputKind::Pdf,
                other => {
                    return Err(Error::Config(format!(
                        "CERTSIGN_OUTPUT must be `png` or `pdf`, got `{}`",
                        other
                    )))
                }
            };
        }
        if let Some(width) = var("BATCH_MAX_WIDTH") {
            config.batch.max_width = parse_var("BATCH_MAX_WIDTH", &width)?;
        }

        if let Some(enabled) = var("SIGNING_ENABLED") {
            config.signing.enabled = parse_var("SIGNING_ENABLED", &enabled)?;
        }
        config.signing.certificate_path = var("SIGNING_CERT_PATH").map(PathBuf::from);
        config.signing.private_key_path = var("SIGNING_KEY_PATH").map(PathBuf::from);
        if let Some(name) = var("SIGNING_NAME") {
            config.signing.signer_name = name;
        }
        if let Some(reason) = var("SIGNING_REASON") {
            config.signing.reason = reason;
        }
        config.signing.location = var("SIGNING_LOCATION");
        config.signing.contact_info = var("SIGNING_CONTACT");
        if let Some(secs) = var("SIGNING_TIMEOUT_SECS") {
            config.signing.timeout_secs = parse_var("SIGNING_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }

    pub fn signature_key(&self) -> Result<SignatureKey, Error> {
        match (&self.signature_key, &self.signature_passphrase) {
            (Some(key), _) => SignatureKey::from_base64(key),
            (None, Some(passphrase)) => Ok(SignatureKey::from_passphrase(passphrase)),
            (None, None) => Err(Error::Config(
                "Neither a signature key nor a passphrase is configured.".to_owned(),
            )),
        }
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn load_watermark(&self) -> Result<Option<Vec<u8>>, Error> {
        self.watermark_path
            .as_deref()
            .map(std::fs::read)
            .transpose()
            .map_err(Error::from)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("CERTSIGN_{} has an invalid value `{}`", name, value)))
}
