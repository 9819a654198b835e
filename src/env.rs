//! Collaborator seams for the KML engine.
//!
//! Archive extraction, network fetch, geometry reprojection and viewport
//! sizing all live outside this crate; the parser only sees these traits.

use crate::geom::Geometry;

/// A single entry extracted from a compressed archive (KMZ).
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Generic archive codec: turns raw archive bytes into named entries.
pub trait ArchiveCodec {
    fn list_entries(&self, bytes: &[u8]) -> Result<Vec<ArchiveEntry>, String>;
}

/// Fetches external stylesheet documents by URL.
pub trait StyleFetcher {
    fn get(&self, url: &str) -> Result<String, String>;
}

/// Reprojects parsed geometries into the application projection. Applied
/// once per parsed feature geometry.
pub trait GeometryTransform {
    fn transform(&self, geom: Geometry) -> Geometry;
}

/// Provides the current viewport size, used to resolve fraction-based
/// screen overlay coordinates to pixels.
pub trait ViewportSize {
    fn current_size(&self) -> (f64, f64);
}

/// The set of collaborators one parse runs against.
pub struct ParseEnv {
    pub archive: Box<dyn ArchiveCodec>,
    pub fetcher: Box<dyn StyleFetcher>,
    pub transform: Box<dyn GeometryTransform>,
    pub viewport: Box<dyn ViewportSize>,
}

impl Default for ParseEnv {
    fn default() -> Self {
        ParseEnv {
            archive: Box::new(NoArchive),
            fetcher: Box::new(NoFetch),
            transform: Box::new(IdentityTransform),
            viewport: Box::new(FixedViewport::default()),
        }
    }
}

/// Default codec: archives are not supported until a real codec is supplied.
pub struct NoArchive;

impl ArchiveCodec for NoArchive {
    fn list_entries(&self, _bytes: &[u8]) -> Result<Vec<ArchiveEntry>, String> {
        Err("no archive codec configured".to_string())
    }
}

/// Default fetcher: all external stylesheet fetches fail (non-fatally).
pub struct NoFetch;

impl StyleFetcher for NoFetch {
    fn get(&self, _url: &str) -> Result<String, String> {
        Err("no network fetcher configured".to_string())
    }
}

/// Identity reprojection.
pub struct IdentityTransform;

impl GeometryTransform for IdentityTransform {
    fn transform(&self, geom: Geometry) -> Geometry {
        geom
    }
}

/// Fixed-size viewport, defaulting to 1920x1080.
pub struct FixedViewport {
    pub width: f64,
    pub height: f64,
}

impl Default for FixedViewport {
    fn default() -> Self {
        FixedViewport {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl ViewportSize for FixedViewport {
    fn current_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}
