use crate::acro_form::AcroForm;
use crate::config::SigningConfig;
use crate::pdf_object::{locate_entry, EntryLocation};
use crate::pdf_signer::PdfSigningDocument;
use crate::Error;
use chrono::{DateTime, Utc};
use lopdf::{Object, ObjectId, StringFormat};

/// Permission level of the certification: form filling and signing allowed.
const DOC_MDP_PERMISSIONS: i64 = 2;
/// Widget annotation flags: `Print` and `Locked`.
const WIDGET_FLAGS: i64 = 132;
/// `SignaturesExist` and `AppendOnly`.
const SIG_FLAGS: i64 = 3;

/// Descriptive entries of a certification signature.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub name: String,
    pub reason: String,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub signing_time: DateTime<Utc>,
    /// Partial name of the signature field.
    pub field_name: String,
}

impl SignatureInfo {
    pub fn from_config(config: &SigningConfig, field_name: String) -> Self {
        SignatureInfo {
            name: config.signer_name.clone(),
            reason: config.reason.clone(),
            location: config.location.clone(),
            contact_info: config.contact_info.clone(),
            signing_time: Utc::now(),
            field_name,
        }
    }

    /// The signature value dictionary with placeholder `ByteRange` and `Contents`.
    fn value_dictionary(&self) -> lopdf::Dictionary {
        use lopdf::Object::*;

        let text = |value: &str| String(value.as_bytes().to_vec(), StringFormat::Literal);
        let mut dict = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("Sig".as_bytes().to_vec())),
            ("Filter", Name("Adobe.PPKLite".as_bytes().to_vec())),
            ("SubFilter", Name("adbe.pkcs7.detached".as_bytes().to_vec())),
            // The order of `ByteRange` and `Contents` is important.
            // They should not be moved or switched in ordering.
            (
                "ByteRange", // Set default value. This will later be filled in.
                Array(vec![
                    Integer(0),
                    Integer(10000), // byte of `<`
                    Integer(20000), // Byte of char after `>`
                    Integer(10000), // until end of file
                ]),
            ),
            (
                "Contents", // Will be filled in later
                String(vec![0u8; 9000], StringFormat::Hexadecimal),
            ),
            (
                "M",
                text(&self.signing_time.format("D:%Y%m%d%H%M%S+00'00'").to_string()),
            ),
            ("Name", text(&self.name)),
            ("Reason", text(&self.reason)),
        ]);
        if let Some(location) = &self.location {
            dict.set("Location", text(location));
        }
        if let Some(contact_info) = &self.contact_info {
            dict.set("ContactInfo", text(contact_info));
        }
        dict.set(
            "Reference",
            Array(vec![Dictionary(lopdf::Dictionary::from_iter(vec![
                ("Type", Name("SigRef".as_bytes().to_vec())),
                ("TransformMethod", Name("DocMDP".as_bytes().to_vec())),
                (
                    "TransformParams",
                    Dictionary(lopdf::Dictionary::from_iter(vec![
                        ("Type", Name("TransformParams".as_bytes().to_vec())),
                        ("P", Integer(DOC_MDP_PERMISSIONS)),
                        ("V", Name("1.2".as_bytes().to_vec())),
                    ])),
                ),
            ]))]),
        );
        dict.set(
            "Prop_Build",
            Dictionary(lopdf::Dictionary::from_iter(vec![(
                "App",
                Dictionary(lopdf::Dictionary::from_iter(vec![
                    ("Name", Name(env!("CARGO_PKG_NAME").as_bytes().to_vec())),
                    (
                        "OS",
                        Array(vec![Name(std::env::consts::OS.as_bytes().to_vec())]),
                    ),
                    ("REx", text(env!("CARGO_PKG_VERSION"))), // Semversion number
                ])),
            )])),
        );
        dict
    }
}

impl PdfSigningDocument {
    /// Add an invisible certification signature field to the first page.
    /// Returns the id of the signature value dictionary.
    pub(crate) fn add_certification_signature(
        &mut self,
        info: &SignatureInfo,
    ) -> Result<ObjectId, Error> {
        use lopdf::Object::*;

        if AcroForm::has_signed_signature(&self.raw_document)? {
            return Err(Error::from("Document is already signed."));
        }

        let root_obj_id = self.raw_document.trailer.get(b"Root")?.as_reference()?;
        let page_id = *self
            .raw_document
            .get_pages()
            .values()
            .next()
            .ok_or_else(|| Error::from("Document has no pages."))?;

        let v_ref = self
            .raw_document
            .add_object(Dictionary(info.value_dictionary()));

        let field = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("Annot".as_bytes().to_vec())),
            ("Subtype", Name("Widget".as_bytes().to_vec())),
            ("FT", Name("Sig".as_bytes().to_vec())),
            (
                "T",
                String(info.field_name.as_bytes().to_vec(), StringFormat::Literal),
            ),
            ("V", Reference(v_ref)),
            (
                "Rect",
                Array(vec![Integer(0), Integer(0), Integer(0), Integer(0)]),
            ),
            ("F", Integer(WIDGET_FLAGS)),
            ("P", Reference(page_id)),
        ]);
        let field_id = self.raw_document.add_object(Dictionary(field));

        self.append_to_array(page_id, b"Annots", Reference(field_id))?;

        let acro_form_id = match locate_entry(&self.raw_document, root_obj_id, b"AcroForm")? {
            EntryLocation::Indirect(id) => id,
            EntryLocation::Inline => root_obj_id,
            EntryLocation::Missing => {
                let id = self
                    .raw_document
                    .add_object(Dictionary(lopdf::Dictionary::new()));
                self.root_mut(root_obj_id)?.set("AcroForm", Reference(id));
                id
            }
        };
        if acro_form_id == root_obj_id {
            // Inline `AcroForm`, edit it inside `Root`.
            let acro_form = self
                .root_mut(root_obj_id)?
                .get_mut(b"AcroForm")?
                .as_dict_mut()?;
            push_to_array(acro_form, b"Fields", Reference(field_id))?;
            acro_form.set("SigFlags", Integer(SIG_FLAGS));
        } else {
            self.append_to_array(acro_form_id, b"Fields", Reference(field_id))?;
            self.raw_document
                .get_object_mut(acro_form_id)?
                .as_dict_mut()?
                .set("SigFlags", Integer(SIG_FLAGS));
        }

        // A document has at most one certification signature.
        self.root_mut(root_obj_id)?.set(
            "Perms",
            lopdf::Dictionary::from_iter(vec![("DocMDP", Reference(v_ref))]),
        );

        Ok(v_ref)
    }

    fn root_mut(&mut self, root_obj_id: ObjectId) -> Result<&mut lopdf::Dictionary, Error> {
        Ok(self
            .raw_document
            .get_object_mut(root_obj_id)?
            .as_dict_mut()?)
    }

    /// Append `item` to the array `key` of dictionary `parent_id`,
    /// following the entry when it is an indirect array.
    fn append_to_array(
        &mut self,
        parent_id: ObjectId,
        key: &[u8],
        item: Object,
    ) -> Result<(), Error> {
        match locate_entry(&self.raw_document, parent_id, key)? {
            EntryLocation::Indirect(array_id) => {
                self.raw_document
                    .get_object_mut(array_id)?
                    .as_array_mut()?
                    .push(item);
                Ok(())
            }
            EntryLocation::Inline | EntryLocation::Missing => {
                let parent = self.raw_document.get_object_mut(parent_id)?.as_dict_mut()?;
                push_to_array(parent, key, item)
            }
        }
    }
}

fn push_to_array(dict: &mut lopdf::Dictionary, key: &[u8], item: Object) -> Result<(), Error> {
    if dict.has(key) {
        dict.get_mut(key)?.as_array_mut()?.push(item);
    } else {
        dict.set(key.to_vec(), Object::Array(vec![item]));
    }
    Ok(())
}
