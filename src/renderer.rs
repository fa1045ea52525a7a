use crate::err::{Error, Result};
use crate::settings::RunSettings;
use crate::template::BoundDocument;

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use svg2pdf::usvg::{self, fontdb};
use svg2pdf::{ConversionOptions, PageOptions};

/// A finished single-page PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedOutput {
    pub bytes: Vec<u8>,
    /// Page width in points.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
}

/// Converts bound SVG documents into PDF pages.
///
/// The font database is built once and shared by every conversion.
pub struct Renderer {
    fontdb: Arc<fontdb::Database>,
    resources_dir: Option<PathBuf>,
    dpi: f32,
}

impl Renderer {
    /// `resources_dir` is used to resolve relative image references, usually the template's
    /// directory.
    pub fn new(settings: &RunSettings, resources_dir: Option<&Path>) -> Self {
        let mut db = fontdb::Database::new();

        // Font directories go first, so their families are preferred by `map_generic_families`.
        for dir in settings.get_font_dirs() {
            if dir.is_dir() {
                db.load_fonts_dir(dir);
            } else {
                warn!("Font directory {} does not exist, skipping", dir.display());
            }
        }
        if settings.should_load_system_fonts() {
            db.load_system_fonts();
        }

        map_generic_families(&mut db);
        info!("Loaded {} font faces", db.len());

        Renderer {
            fontdb: Arc::new(db),
            resources_dir: resources_dir.map(Path::to_path_buf),
            dpi: settings.get_dpi(),
        }
    }

    pub fn font_count(&self) -> usize {
        self.fontdb.len()
    }

    /// Converts `doc` into a PDF page.
    ///
    /// Text with no usable font and images that cannot be loaded fail the page with
    /// [`Error::MissingResource`], instead of being left out of the PDF.
    pub fn render(&self, doc: &BoundDocument) -> Result<RenderedOutput> {
        let missing = Mutex::new(Vec::new());

        let parsed = {
            let options = usvg::Options {
                resources_dir: self.resources_dir.clone(),
                fontdb: Arc::clone(&self.fontdb),
                font_resolver: recording_font_resolver(&missing),
                image_href_resolver: recording_image_resolver(&missing),
                ..usvg::Options::default()
            };
            usvg::Tree::from_str(doc.as_str(), &options)
        };

        let tree = parsed.map_err(|e| Error::InvalidBoundDocument {
            index: doc.index(),
            message: e.to_string(),
        })?;

        let missing = match missing.into_inner() {
            Ok(missing) => missing,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(resource) = missing.into_iter().next() {
            return Err(Error::MissingResource {
                index: doc.index(),
                resource,
            });
        }

        let size = tree.size();
        let mut page_options = PageOptions::default();
        page_options.dpi = self.dpi;
        let bytes = svg2pdf::to_pdf(&tree, ConversionOptions::default(), page_options).map_err(
            |e| Error::ConversionFailed {
                index: doc.index(),
                message: e.to_string(),
            },
        )?;

        let scale = 72.0 / self.dpi;
        debug!(
            "Page {}: rendered {}x{} page into {} bytes",
            doc.index(),
            size.width() * scale,
            size.height() * scale,
            bytes.len()
        );

        Ok(RenderedOutput {
            bytes,
            width: size.width() * scale,
            height: size.height() * scale,
        })
    }
}

fn record_missing(missing: &Mutex<Vec<String>>, resource: String) {
    if let Ok(mut missing) = missing.lock() {
        missing.push(resource);
    }
}

/// The default usvg font selection, remembering every font request that matched nothing.
fn recording_font_resolver(missing: &Mutex<Vec<String>>) -> usvg::FontResolver<'_> {
    let select_font = usvg::FontResolver::default_font_selector();

    usvg::FontResolver {
        select_font: Box::new(
            move |font: &usvg::Font, db: &mut Arc<fontdb::Database>| {
                let id = select_font(font, db);
                if id.is_none() {
                    let families = font
                        .families()
                        .iter()
                        .map(|family| family.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    record_missing(missing, format!("a font for `{}`", families));
                }
                id
            },
        ),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

/// The default usvg image loading, remembering every `href` it could not turn into an image.
fn recording_image_resolver(missing: &Mutex<Vec<String>>) -> usvg::ImageHrefResolver<'_> {
    let resolve_data = usvg::ImageHrefResolver::default_data_resolver();
    let resolve_string = usvg::ImageHrefResolver::default_string_resolver();

    usvg::ImageHrefResolver {
        resolve_data: Box::new(
            move |mime: &str, data: Arc<Vec<u8>>, opts: &usvg::Options| {
                let image = resolve_data(mime, data, opts);
                if image.is_none() {
                    record_missing(missing, format!("embedded image of type `{}`", mime));
                }
                image
            },
        ),
        resolve_string: Box::new(move |href: &str, opts: &usvg::Options| {
            let image = resolve_string(href, opts);
            if image.is_none() {
                record_missing(missing, format!("image `{}`", href));
            }
            image
        }),
    }
}

/// Points generic families (`serif`, `sans-serif`, ...) that name no loaded face at the first
/// loaded family.
fn map_generic_families(db: &mut fontdb::Database) {
    let Some(fallback) = db
        .faces()
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
    else {
        return;
    };

    let generics = [
        fontdb::Family::Serif,
        fontdb::Family::SansSerif,
        fontdb::Family::Monospace,
        fontdb::Family::Cursive,
        fontdb::Family::Fantasy,
    ];

    for generic in generics {
        let name = db.family_name(&generic).to_owned();
        let is_loaded = db
            .faces()
            .any(|face| face.families.iter().any(|(family, _)| *family == name));
        if is_loaded {
            continue;
        }

        debug!("Font family `{}` is not available, using `{}`", name, fallback);
        match generic {
            fontdb::Family::Serif => db.set_serif_family(fallback.as_str()),
            fontdb::Family::SansSerif => db.set_sans_serif_family(fallback.as_str()),
            fontdb::Family::Monospace => db.set_monospace_family(fallback.as_str()),
            fontdb::Family::Cursive => db.set_cursive_family(fallback.as_str()),
            fontdb::Family::Fantasy => db.set_fantasy_family(fallback.as_str()),
            fontdb::Family::Name(_) => {}
        }
    }
}
