//! A KML parsing engine that turns KML and KMZ documents into a scene tree
//! of features, overlays and network links.
//!
//! Parsing is incremental: [`KmlParser`] walks the document one element per
//! [`KmlParser::parse_next`] call, so the host application controls the
//! stepping cadence. Archive extraction, external stylesheet fetching,
//! geometry reprojection and viewport sizing are supplied through the
//! [`env::ParseEnv`] collaborator seams.
//!
//! ```
//! use kml_scene::parse_scene;
//!
//! let tree = parse_scene(
//!     r#"<kml><Document><name>Demo</name>
//!          <Placemark><name>P</name>
//!            <Point><coordinates>10,20</coordinates></Point>
//!          </Placemark>
//!        </Document></kml>"#,
//! )
//! .unwrap();
//! assert_eq!(tree.len(), 3);
//! ```

pub mod dom;
pub mod env;
pub mod error;
pub mod geom;
pub mod node;
pub mod parser;
pub mod schema;
pub mod source;
pub mod style;

pub use env::ParseEnv;
pub use error::{KmlError, KmlResult};
pub use geom::{Coordinate, Geometry};
pub use node::{
    Feature, ImageOverlay, KmlNode, NetworkLink, NodeId, NodePayload, RefreshMode, SceneTree,
    ScreenOverlay, TriState,
};
pub use parser::KmlParser;
pub use schema::FieldValue;
pub use source::{KmlInput, ParseConfig};
pub use style::StyleConfig;

/// Parse a complete document in one call with the default environment.
pub fn parse_scene(input: impl Into<KmlInput>) -> KmlResult<SceneTree> {
    parse_scene_with_env(input, ParseEnv::default())
}

/// Parse a complete document in one call against the given collaborators.
pub fn parse_scene_with_env(
    input: impl Into<KmlInput>,
    env: ParseEnv,
) -> KmlResult<SceneTree> {
    let mut parser = KmlParser::with_env(env);
    parser.set_source(input)?;
    while parser.has_next() {
        parser.parse_next();
    }
    Ok(parser.take_tree())
}
