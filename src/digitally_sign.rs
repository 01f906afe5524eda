use crate::byte_range::ByteRange;
use crate::pdf_signer::PdfSigningDocument;
use crate::Error;
use cryptographic_message_syntax::{Bytes, Oid, SignedDataBuilder, SignerBuilder};

/// Hex digits reserved for the CMS signature in `Contents`.
const CONTENTS_HEX_LEN: usize = 18000;
/// Width the `ByteRange` values are padded to.
const FIXED_BYTE_RANGE_WIDTH: usize = 25;
const DEFAULT_BYTE_RANGE: &[u8] = b"0 10000 20000 10000";

impl PdfSigningDocument {
    /// Digitally signs the document using a cryptographically secure algorithm.
    /// Note that using this function will prevent you from changing anything else about the document.
    /// Changing the document in any other way will invalidate the cryptographic check.
    pub(crate) fn digitally_sign_document(
        &mut self,
        signer: SignerBuilder<'_>,
    ) -> Result<Vec<u8>, Error> {
        // Convert pdf document to binary data.
        let mut pdf_file_data: Vec<u8> = Vec::new();
        self.write_document(&mut pdf_file_data)?;

        let (byte_range, pdf_file_data) = Self::set_next_byte_range(pdf_file_data)?;

        let first_part = &pdf_file_data[byte_range.get_range(0)?];
        let second_part = &pdf_file_data[byte_range.get_range(1)?];

        // create new vec without the content part
        let mut vec = Vec::with_capacity(byte_range.get_capacity_inclusive());
        vec.extend_from_slice(first_part);
        vec.extend_from_slice(second_part);

        // Calculate file hash and sign it using the key
        let signature = SignedDataBuilder::default()
            .content_external(vec)
            .content_type(Oid(Bytes::copy_from_slice(
                cryptographic_message_syntax::asn1::rfc5652::OID_ID_DATA.as_ref(),
            )))
            .signer(signer)
            .build_der()?;

        // Write signature to file
        Self::set_content(pdf_file_data, signature)
    }

    // Find and set the `Content` field in the signature
    fn set_content(mut pdf_file_data: Vec<u8>, content: Vec<u8>) -> Result<Vec<u8>, Error> {
        let capacity = Self::content_capacity();
        if content.len() * 2 > capacity {
            return Err(Error::from(format!(
                "Length of content is to long. Available: {}, Needed: {}",
                capacity,
                content.len() * 2
            )));
        }
        let mut pattern = b"/Contents<".to_vec();
        pattern.extend_from_slice(&[b'0'; 51]); // Just add the first part, rest will be okay

        let found_at = match Self::find_binary_pattern(&pdf_file_data, &pattern) {
            Some(found_at) => found_at,
            None => return Err(Self::pattern_not_found(&pdf_file_data, &pattern)),
        };

        // Construct new Contents and insert it into file
        let mut new_contents_vec = b"/Contents<".to_vec();
        for byte in content {
            new_contents_vec.extend_from_slice(format!("{:02x}", byte).as_bytes());
        }
        pdf_file_data.splice(
            found_at..(found_at + new_contents_vec.len()),
            new_contents_vec,
        );

        Ok(pdf_file_data)
    }

    /// Set the next found byte `ByteRange` that still has the default values.
    fn set_next_byte_range(mut pdf_file_data: Vec<u8>) -> Result<(ByteRange, Vec<u8>), Error> {
        let mut pattern_prefix = b"/ByteRange[".to_vec();
        pattern_prefix.extend_from_slice(DEFAULT_BYTE_RANGE);
        pattern_prefix.extend_from_slice(b"]/Contents<");
        let mut pattern = pattern_prefix.clone();
        pattern.extend_from_slice(&[b'0'; 51]); // Just add the first part, rest will be okay

        // Search for `ByteRange` tag with default values
        let found_at = match Self::find_binary_pattern(&pdf_file_data, &pattern) {
            Some(found_at) => found_at,
            None => return Err(Self::pattern_not_found(&pdf_file_data, &pattern)),
        };

        // Calculate `ByteRange`
        let pattern_prefix_len = b"/ByteRange[]/Contents<".len() + FIXED_BYTE_RANGE_WIDTH;
        let content_len = Self::content_capacity();
        let content_offset = found_at + pattern_prefix_len - 1;
        let tail_len = pdf_file_data
            .len()
            .checked_sub(content_offset + content_len + 2)
            .ok_or_else(|| Error::from("`Contents` placeholder is truncated."))?;
        let byte_range = ByteRange(vec![
            0,
            content_offset,
            content_offset + content_len + 2,
            tail_len,
        ]);

        // Construct new ByteRange and insert it into file.
        // The `0`s after `Contents<` overwrite what is left of the default values.
        let new_byte_range_string = format!(
            "/ByteRange[{}]/Contents<0000000000000000000000",
            byte_range.to_list(FIXED_BYTE_RANGE_WIDTH)?
        );
        // The `Contents<...>` always need to be an even number of chars.
        debug_assert_eq!(pattern_prefix.len() % 2, new_byte_range_string.len() % 2);
        let new_byte_range_string = new_byte_range_string.into_bytes();

        pdf_file_data.splice(
            found_at..(found_at + new_byte_range_string.len()),
            new_byte_range_string,
        );

        Ok((byte_range, pdf_file_data))
    }

    /// Hex digits left for the signature once `ByteRange` is padded.
    fn content_capacity() -> usize {
        CONTENTS_HEX_LEN + DEFAULT_BYTE_RANGE.len() - FIXED_BYTE_RANGE_WIDTH
    }

    /// Finds the first instance matching the pattern.
    ///
    /// Result is `byte_offset_where_pattern_starts`
    fn find_binary_pattern(bytes: &[u8], pattern: &[u8]) -> Option<usize> {
        if bytes.is_empty() || pattern.is_empty() {
            return None;
        }
        bytes
            .windows(pattern.len())
            .position(|window| window == pattern)
    }

    fn pattern_not_found(pdf_file_data: &[u8], pattern: &[u8]) -> Error {
        #[cfg(feature = "debug")]
        {
            let crashed_file = "./pdf_missing_pattern.pdf";
            match std::fs::write(crashed_file, pdf_file_data) {
                Ok(()) => log::error!("Saved unsignable file to: `{}`.", crashed_file),
                Err(err) => log::error!("Could not save `{}`: {}", crashed_file, err),
            }
        }
        #[cfg(not(feature = "debug"))]
        let _ = pdf_file_data;

        Error::from(format!(
            "Pattern not found `{}`.",
            String::from_utf8_lossy(&pattern[..pattern.len().min(40)]),
        ))
    }
}
