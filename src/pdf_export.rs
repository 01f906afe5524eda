use crate::image_xobject::ImageXObject;
use crate::Error;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};

const IMAGE_NAME: &str = "Im0";

/// Wrap a PNG on a single page of `width` by `height` points.
pub fn png_to_pdf(png: &[u8], width: f64, height: f64) -> Result<Vec<u8>, Error> {
    use lopdf::Object::*;

    if !(width > 0.0 && height > 0.0) {
        return Err(Error::Render(format!(
            "invalid page size {} x {}",
            width, height
        )));
    }

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let (mut image_xobject, mask_xobject) = ImageXObject::try_from(png::Decoder::new(png))?;
    if let Some(mask_xobject) = mask_xobject {
        let mask_xobject_id = doc.add_object(mask_xobject);
        image_xobject.s_mask = Some(mask_xobject_id);
    }
    let image_xobject_id = doc.add_object(image_xobject);

    // `cm` scales the unit square the image is drawn into up to the page.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0i32.into(),
                    0i32.into(),
                    height.into(),
                    0i32.into(),
                    0i32.into(),
                ],
            ),
            Operation::new("Do", vec![Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(lopdf::Stream::new(
        lopdf::Dictionary::new(),
        content.encode()?,
    ));

    let resources = lopdf::Dictionary::from_iter(vec![(
        "XObject",
        Object::Dictionary(lopdf::Dictionary::from_iter(vec![(
            IMAGE_NAME,
            Reference(image_xobject_id),
        )])),
    )]);
    let page_id = doc.add_object(lopdf::Dictionary::from_iter(vec![
        ("Type", Name("Page".as_bytes().to_vec())),
        ("Parent", Reference(pages_id)),
        ("Contents", Reference(content_id)),
        ("Resources", Object::Dictionary(resources)),
        (
            "MediaBox",
            Array(vec![0i32.into(), 0i32.into(), width.into(), height.into()]),
        ),
    ]));

    let pages = lopdf::Dictionary::from_iter(vec![
        ("Type", Name("Pages".as_bytes().to_vec())),
        ("Kids", Array(vec![Reference(page_id)])),
        ("Count", Integer(1)),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(lopdf::Dictionary::from_iter(vec![
        ("Type", Name("Catalog".as_bytes().to_vec())),
        ("Pages", Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Reference(catalog_id));

    let mut output = Vec::new();
    doc.save_to(&mut output)?;
    Ok(output)
}
