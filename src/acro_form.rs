//! `AcroForm` is the section of a pdf used to store info about forms.
//!
//! Only signature fields are read here, to find out whether a document was
//! already signed before a certification signature is added.

use crate::pdf_object::PdfObjectDeref;
use crate::Error;
use lopdf::{Dictionary, Document, Object};

#[derive(Debug, Clone)]
pub(crate) struct AcroForm {
    partial_field_name: Option<String>,
    form_component: FormComponent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FormComponent {
    /// Signature field, not signed.
    EmptySignature,
    /// Signature field, already signed.
    SignedSignature {
        filter: String,
        sub_filter: Option<String>,
        byte_range: Vec<(u64, u64)>,
        /// The name of the person or authority signing the document.
        name: Option<String>,
    },
    /// Any other field type.
    Other,
}

impl AcroForm {
    pub(crate) fn load_all_forms(raw_doc: &Document) -> Result<Vec<Self>, Error> {
        // Structure of pdf:
        // - Root (dictionary)
        //   - AcroForm (dictionary)
        //     - Fields (array)
        //       - <references>
        let root = raw_doc.trailer.get(b"Root")?.deref(raw_doc)?.as_dict()?;

        if !root.has(b"AcroForm") {
            log::debug!("Document does not contain any forms.");
            return Ok(vec![]);
        }
        let acro_form_dict = root.get(b"AcroForm")?.deref(raw_doc)?.as_dict()?;
        if !acro_form_dict.has(b"Fields") {
            return Ok(vec![]);
        }
        let fields_list = acro_form_dict.get(b"Fields")?.deref(raw_doc)?.as_array()?;

        let mut form_fields = vec![];
        Self::load_field_list(raw_doc, fields_list, &mut form_fields, 0)?;
        Ok(form_fields)
    }

    /// True when any signature field already carries a signature value.
    pub(crate) fn has_signed_signature(raw_doc: &Document) -> Result<bool, Error> {
        let forms = Self::load_all_forms(raw_doc)?;
        match forms.iter().find(|form| form.is_signed_signature()) {
            Some(form) => {
                log::debug!(
                    "Field `{}` already carries a signature.",
                    form.get_partial_field_name().unwrap_or("<unnamed>")
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn is_signed_signature(&self) -> bool {
        matches!(
            self.get_form_component(),
            FormComponent::SignedSignature { .. }
        )
    }

    pub(crate) fn get_partial_field_name(&self) -> Option<&str> {
        self.partial_field_name.as_deref()
    }

    pub(crate) fn get_form_component(&self) -> &FormComponent {
        &self.form_component
    }

    /// Parse a list in the hierarchy of `Root->AcroForm->Fields`.
    /// Fields without `FT` are containers, their `Kids` are parsed too.
    fn load_field_list(
        raw_doc: &Document,
        list: &[Object],
        form_fields: &mut Vec<Self>,
        depth: usize,
    ) -> Result<(), Error> {
        // Malformed documents can contain reference cycles.
        if depth > 32 {
            log::warn!("AcroForm field hierarchy is too deep, stopped parsing.");
            return Ok(());
        }

        for field in list {
            let field_dict = field.deref(raw_doc)?.as_dict()?;

            if field_dict.has(b"FT") {
                let component = match field_dict.get(b"FT")?.as_name()? {
                    b"Sig" => Self::signature_component(raw_doc, field_dict)?,
                    _ => FormComponent::Other,
                };
                form_fields.push(AcroForm {
                    partial_field_name: text_string(field_dict.get(b"T").ok()),
                    form_component: component,
                });
            } else if field_dict.has(b"Kids") {
                let kids = field_dict.get(b"Kids")?.deref(raw_doc)?.as_array()?;
                Self::load_field_list(raw_doc, kids, form_fields, depth + 1)?;
            }
        }
        Ok(())
    }

    fn signature_component(
        raw_doc: &Document,
        field_dict: &Dictionary,
    ) -> Result<FormComponent, Error> {
        if !field_dict.has(b"V") {
            return Ok(FormComponent::EmptySignature);
        }
        let sign_value_dict = field_dict.get(b"V")?.deref(raw_doc)?.as_dict()?;
        if !(sign_value_dict.has(b"Filter") || sign_value_dict.has(b"Contents")) {
            return Ok(FormComponent::EmptySignature);
        }
        Ok(FormComponent::SignedSignature {
            filter: sign_value_dict
                .get(b"Filter")
                .and_then(Object::as_name_str)
                .map(str::to_owned)
                .unwrap_or_default(),
            sub_filter: sign_value_dict
                .get(b"SubFilter")
                .and_then(Object::as_name_str)
                .map(str::to_owned)
                .ok(),
            byte_range: byte_range_pairs(sign_value_dict.get(b"ByteRange").ok())?,
            name: text_string(sign_value_dict.get(b"Name").ok()),
        })
    }
}

fn text_string(obj: Option<&Object>) -> Option<String> {
    obj.and_then(|obj| obj.as_str().ok())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn byte_range_pairs(obj: Option<&Object>) -> Result<Vec<(u64, u64)>, Error> {
    let list = match obj {
        Some(obj) => obj.as_array()?,
        None => return Ok(vec![]),
    };
    let values = list
        .iter()
        .map(|item| -> Result<u64, Error> { Ok(u64::try_from(item.as_i64()?)?) })
        .collect::<Result<Vec<u64>, Error>>()?;
    if values.len() % 2 != 0 {
        log::warn!("Expected pairs, got an uneven length.");
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect())
}
