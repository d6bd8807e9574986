//! EPUB 3 package writer plus the image-aware renderer that fills it from a chapter tree.
//!
//! [EpubBuilder] collects sections and images in memory and writes the archive in one go
//! (mimetype, container, OPF, nav, optional NCX, sections, images).

mod render;

pub use render::{render_epub, write_epub, EpubRenderer};

use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const IMAGE_DIR: &str = "images";

/// Errors from writing the package. Always fatal: a half-written archive has no consumer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: the book has no sections.")]
    NoSections,

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// One spine entry. Untitled sections are read in order but left out of the nav.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: String,
    pub href: String,
    pub title: Option<String>,
    pub html: String,
}

#[derive(Debug, Clone)]
struct Image {
    id: String,
    href: String,
    media_type: &'static str,
    bytes: Vec<u8>,
}

/// In-memory EPUB package: append sections, register images, then write.
#[derive(Debug, Clone)]
pub struct EpubBuilder {
    title: String,
    author: String,
    identifier: String,
    include_ncx: bool,
    sections: Vec<Section>,
    images: Vec<Image>,
    /// Source address -> package-local path.
    by_source: BTreeMap<String, String>,
}

impl EpubBuilder {
    pub fn new(title: &str, author: &str) -> Self {
        let title = if title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            title.trim().to_string()
        };
        Self {
            title,
            author: author.trim().to_string(),
            identifier: "urn:webbook:book".to_string(),
            include_ncx: false,
            sections: Vec::new(),
            images: Vec::new(),
            by_source: BTreeMap::new(),
        }
    }

    /// Unique identifier for the OPF (usually the seed URL).
    pub fn identifier(mut self, id: &str) -> Self {
        if !id.trim().is_empty() {
            self.identifier = id.trim().to_string();
        }
        self
    }

    /// Include toc.ncx for legacy readers.
    pub fn include_ncx(mut self, yes: bool) -> Self {
        self.include_ncx = yes;
        self
    }

    /// Append a section; returns its manifest id.
    pub fn add_section(&mut self, html: &str, title: Option<&str>) -> String {
        let n = self.sections.len() + 1;
        let id = format!("section-{:04}", n);
        self.sections.push(Section {
            href: format!("{}.xhtml", id),
            id: id.clone(),
            title: title.map(String::from).filter(|t| !t.trim().is_empty()),
            html: html.to_string(),
        });
        id
    }

    /// Register an image under its source address and return its package-local path.
    /// A source registered twice keeps its first path.
    pub fn add_image(&mut self, source: &str, bytes: Vec<u8>, content_type: Option<&str>) -> String {
        if let Some(existing) = self.by_source.get(source) {
            return existing.clone();
        }
        let n = self.images.len() + 1;
        let (ext, media_type) = image_kind(source, content_type);
        let href = format!("{}/image-{:04}.{}", IMAGE_DIR, n, ext);
        self.images.push(Image {
            id: format!("image-{:04}", n),
            href: href.clone(),
            media_type,
            bytes,
        });
        self.by_source.insert(source.to_string(), href.clone());
        href
    }

    /// Package-local path of an already registered source.
    pub fn image_path(&self, source: &str) -> Option<&str> {
        self.by_source.get(source).map(String::as_str)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Write the package to `path`.
    pub fn write(&self, path: &Path) -> Result<(), EpubError> {
        if self.sections.is_empty() {
            return Err(EpubError::NoSections);
        }
        let file = std::fs::File::create(path).map_err(|e| EpubError::CreateFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.write_to(file)?;
        Ok(())
    }

    /// Write the package to any seekable sink and hand the sink back.
    pub fn write_to<W: Write + Seek>(&self, sink: W) -> Result<W, EpubError> {
        if self.sections.is_empty() {
            return Err(EpubError::NoSections);
        }
        let mut zip = ZipWriter::new(sink);

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // Mimetype first, uncompressed (required by EPUB)
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        self.write_opf(&mut zip, options_deflate)?;
        self.write_nav(&mut zip, options_deflate)?;
        if self.include_ncx {
            self.write_ncx(&mut zip, options_deflate)?;
        }
        self.write_sections(&mut zip, options_deflate)?;
        for image in &self.images {
            zip.start_file(format!("{}{}", OEBPS_PREFIX, image.href), options_deflate)?;
            zip.write_all(&image.bytes)?;
        }

        Ok(zip.finish()?)
    }

    /// Nav entries: titled sections, or the first section under the book title when none are.
    fn nav_entries(&self) -> Vec<(&str, &str)> {
        let titled: Vec<(&str, &str)> = self
            .sections
            .iter()
            .filter_map(|s| s.title.as_deref().map(|t| (s.href.as_str(), t)))
            .collect();
        if titled.is_empty() {
            self.sections
                .first()
                .map(|s| vec![(s.href.as_str(), self.title.as_str())])
                .unwrap_or_default()
        } else {
            titled
        }
    }

    fn write_opf(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut manifest = String::from(
            r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
"#,
        );
        if self.include_ncx {
            manifest.push_str(
                r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
            );
        }
        for s in &self.sections {
            manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                s.id, s.href
            ));
        }
        for image in &self.images {
            manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                image.id, image.href, image.media_type
            ));
        }

        let spine = self
            .sections
            .iter()
            .map(|s| format!("    <itemref idref=\"{}\"/>", s.id))
            .collect::<Vec<_>>()
            .join("\n");
        let spine_open = if self.include_ncx {
            r#"<spine toc="ncx">"#
        } else {
            "<spine>"
        };
        let creator = if self.author.is_empty() {
            String::new()
        } else {
            format!("\n    <dc:creator>{}</dc:creator>", xml_escape(&self.author))
        };

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>{creator}
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  {spine_open}
{spine}
  </spine>
</package>
"#,
            id = xml_escape(&self.identifier),
            title = xml_escape(&self.title),
            creator = creator,
            manifest = manifest,
            spine_open = spine_open,
            spine = spine,
        );

        zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
        zip.write_all(opf.as_bytes())?;
        Ok(())
    }

    fn write_nav(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let links: String = self
            .nav_entries()
            .into_iter()
            .map(|(href, title)| {
                format!(
                    "      <li><a href=\"{}\">{}</a></li>\n",
                    href,
                    xml_escape(title)
                )
            })
            .collect();
        let nav = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
            links
        );
        zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
        zip.write_all(nav.as_bytes())?;
        Ok(())
    }

    fn write_ncx(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let nav_points: String = self
            .nav_entries()
            .into_iter()
            .enumerate()
            .map(|(i, (href, title))| {
                format!(
                    r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{href}"/>
    </navPoint>
"#,
                    n = i + 1,
                    label = xml_escape(title),
                    href = href
                )
            })
            .collect();
        let ncx = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
            xml_escape(&self.identifier),
            xml_escape(&self.title),
            nav_points
        );
        zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
        zip.write_all(ncx.as_bytes())?;
        Ok(())
    }

    fn write_sections(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        for s in &self.sections {
            let title = xml_escape(s.title.as_deref().unwrap_or(&self.title));
            let html = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
{}
</body>
</html>
"#,
                title, s.html
            );
            zip.start_file(format!("{}{}", OEBPS_PREFIX, s.href), options)?;
            zip.write_all(html.as_bytes())?;
        }
        Ok(())
    }
}

/// File extension and media type from the address, then the declared content type.
fn image_kind(source: &str, content_type: Option<&str>) -> (&'static str, &'static str) {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let by_ext = match ext.as_deref() {
        Some("png") => Some(("png", "image/png")),
        Some("jpg") | Some("jpeg") => Some(("jpg", "image/jpeg")),
        Some("gif") => Some(("gif", "image/gif")),
        Some("svg") => Some(("svg", "image/svg+xml")),
        Some("webp") => Some(("webp", "image/webp")),
        _ => None,
    };
    if let Some(kind) = by_ext {
        return kind;
    }
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match declared.as_deref() {
        Some("image/png") => ("png", "image/png"),
        Some("image/jpeg") | Some("image/jpg") => ("jpg", "image/jpeg"),
        Some("image/gif") => ("gif", "image/gif"),
        Some("image/svg+xml") => ("svg", "image/svg+xml"),
        Some("image/webp") => ("webp", "image/webp"),
        _ => ("bin", "application/octet-stream"),
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
