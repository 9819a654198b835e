use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::error;
use uuid::Uuid;

use crate::dom::{ElemId, KmlDom};
use crate::env::ParseEnv;
use crate::error::{KmlError, KmlResult};
use crate::geom;
use crate::node::{
    Feature, ImageOverlay, KmlNode, NetworkLink, NodeId, NodePayload, RefreshMode, SceneTree,
    ScreenCoord, ScreenOverlay, ScreenXY, TriState,
};
use crate::schema::{FieldValue, SchemaRegistry};
use crate::source::{self, KmlInput, ParseConfig};
use crate::style::{self, StyleConfig, StyleScope};

/// Derived convenience fields set from a point geometry's first coordinate.
pub const FIELD_LAT: &str = "LAT";
pub const FIELD_LON: &str = "LON";
pub const FIELD_ALT: &str = "ALTITUDE";
pub const FIELD_ID: &str = "ID";

const CONTAINER_TAGS: [&str; 3] = ["kml", "Document", "Folder"];
const LEAF_TAGS: [&str; 4] = ["NetworkLink", "Placemark", "GroundOverlay", "ScreenOverlay"];

/// Bookkeeping fields excluded from the detected column list.
fn skipped_columns_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(geometry|recordtime|time|styleurl|_kmlstyle)$").unwrap())
}

/// One stack entry of the traversal. The inherited style chain is threaded
/// explicitly instead of being stashed on source elements, outermost
/// ancestor first.
struct ParseFrame {
    children: Vec<ElemId>,
    index: usize,
    node: Option<NodeId>,
    inherited: Vec<Vec<StyleConfig>>,
}

/// Incremental KML parser.
///
/// The traversal is externally driven: each [`KmlParser::parse_next`] call
/// emits at most one scene node, so the host decides the stepping cadence
/// and large documents never block it. Archive extraction and external
/// stylesheet resolution happen up front in [`KmlParser::set_source`];
/// traversal itself never suspends.
///
/// To refresh an already-displayed tree, hand it back with
/// [`KmlParser::set_tree`] before `set_source`: nodes present in both
/// parses (matched by label within the same parent) are updated in place,
/// preserving their visibility and collapse state, and nodes missing from
/// the new document are pruned.
pub struct KmlParser {
    env: ParseEnv,
    config: ParseConfig,
    dom: Option<KmlDom>,
    /// Per-parse random session token, part of every feature id.
    session: String,
    merging: bool,
    tree: SceneTree,
    stack: Vec<ParseFrame>,
    scope: StyleScope,
    schemas: SchemaRegistry,
    /// Archive file names to data URIs. Survives cleanup so assets stay
    /// resolvable across network link refreshes.
    assets: HashMap<String, String>,
    column_order: Vec<String>,
    column_seen: HashSet<String>,
    unnamed_count: u32,
    overlay_count: u32,
    feature_count: u64,
    min_refresh_period_ms: u64,
}

impl Default for KmlParser {
    fn default() -> Self {
        KmlParser::new()
    }
}

impl KmlParser {
    pub fn new() -> KmlParser {
        KmlParser::with_env(ParseEnv::default())
    }

    pub fn with_env(env: ParseEnv) -> KmlParser {
        KmlParser {
            env,
            config: ParseConfig::default(),
            dom: None,
            session: String::new(),
            merging: false,
            tree: SceneTree::new(),
            stack: Vec::new(),
            scope: StyleScope::default(),
            schemas: SchemaRegistry::default(),
            assets: HashMap::new(),
            column_order: Vec::new(),
            column_seen: HashSet::new(),
            unnamed_count: 0,
            overlay_count: 0,
            feature_count: 0,
            min_refresh_period_ms: 0,
        }
    }

    pub fn set_config(&mut self, config: ParseConfig) {
        self.config = config;
    }

    /// Merge the next parse into an existing tree instead of building a
    /// fresh one.
    pub fn set_tree(&mut self, tree: SceneTree) {
        self.merging = tree.root().is_some();
        self.tree = tree;
    }

    /// Release all per-parse state. The tree reference from
    /// [`KmlParser::get_root`] is invalid afterwards. Assets are kept; use
    /// [`KmlParser::clear_assets`] before parsing an unrelated document.
    pub fn cleanup(&mut self) {
        self.dom = None;
        self.merging = false;
        self.tree = SceneTree::new();
        self.stack.clear();
        self.scope = StyleScope::default();
        self.schemas = SchemaRegistry::default();
        self.column_order.clear();
        self.column_seen.clear();
        self.unnamed_count = 0;
        self.overlay_count = 0;
        self.feature_count = 0;
        self.min_refresh_period_ms = 0;
    }

    pub fn clear_assets(&mut self) {
        self.assets.clear();
    }

    /// Resolve the input (archive extraction, external stylesheets) and
    /// prepare the traversal. Fatal errors abort the parse here.
    pub fn set_source(&mut self, input: impl Into<KmlInput>) -> KmlResult<()> {
        let input = input.into();
        let is_archive =
            matches!(&input, KmlInput::Bytes(b) if b.starts_with(&source::ZIP_MAGIC));

        // Reset per-parse state. The tree survives only when a merge target
        // was handed over via set_tree; otherwise a stale root would soak up
        // label matches from the new parse.
        if !self.merging {
            self.tree = SceneTree::new();
        }
        self.dom = None;
        self.stack.clear();
        self.scope = StyleScope::default();
        self.column_order.clear();
        self.column_seen.clear();
        self.unnamed_count = 0;
        self.overlay_count = 0;
        self.feature_count = 0;
        self.min_refresh_period_ms = 0;
        self.session = Uuid::new_v4().simple().to_string();

        let resolved = source::resolve(input, &self.env, &self.config)?;
        if is_archive {
            self.assets = resolved.assets;
        }

        let dom = resolved.dom;
        self.schemas = SchemaRegistry::compile(&dom);

        let root = dom.root();
        let root_children = dom.children(root);
        if root_children.is_empty() {
            error!("Empty KML tree!");
            return Err(KmlError::EmptyDocument);
        }

        for &child in root_children {
            if dom.name(child) == "NetworkLinkControl" {
                if let Some(period) = dom
                    .child_text(child, "minRefreshPeriod")
                    .and_then(|t| t.trim().parse::<u64>().ok())
                {
                    self.min_refresh_period_ms = period * 1000;
                }
            }
        }

        // Start parsing at the root element itself so it becomes the tree
        // root node.
        self.stack.push(ParseFrame {
            children: vec![root],
            index: 0,
            node: None,
            inherited: Vec::new(),
        });
        self.dom = Some(dom);
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Process the next source element. Emits the id of the node built for
    /// it, or `None` when the element produced no output (skipped tags,
    /// silently failed leaf builders, per-node errors).
    pub fn parse_next(&mut self) -> Option<NodeId> {
        let top_idx = self.stack.len().checked_sub(1)?;
        let current = {
            let top = &self.stack[top_idx];
            top.children.get(top.index).copied()
        };
        let parent_node = self.stack[top_idx].node;

        let mut emitted = None;
        let mut push_frame = None;

        if let Some(el) = current {
            let tag = self.dom.as_ref().map(|d| d.name(el).to_string())?;
            let result = if CONTAINER_TAGS.contains(&tag.as_str()) {
                self.step_container(el, &tag, parent_node, top_idx)
            } else if self.is_leaf_tag(&tag) {
                self.step_leaf(el, &tag, parent_node, top_idx)
                    .map(|node| (node, None))
            } else {
                // Unrecognized elements are silently skipped; name, open and
                // visibility have already been folded into their owning node.
                Ok((None, None))
            };

            match result {
                Ok((node, frame)) => {
                    emitted = node;
                    push_frame = frame;
                }
                // Per-node failure: skip this subtree and keep parsing.
                Err(e) => {
                    let err = match e {
                        e @ KmlError::NodeBuild { .. } => e,
                        e => KmlError::NodeBuild {
                            tag,
                            reason: e.to_string(),
                        },
                    };
                    error!("{}", err);
                }
            }
        }

        let top = &mut self.stack[top_idx];
        top.index += 1;
        if top.index >= top.children.len() {
            let frame_node = top.node;
            self.stack.pop();
            if self.merging {
                if let Some(parent) = frame_node {
                    // Remove any children that weren't found in the new KML.
                    self.tree.sweep_children(parent);
                }
            }
        }

        if let Some(frame) = push_frame {
            self.stack.push(frame);
        }

        emitted
    }

    /// Parse ahead until up to `limit` features have been produced. Used
    /// for sampling columns and data before a full import.
    pub fn parse_preview(&mut self, limit: usize) -> Vec<Feature> {
        let mut features = Vec::new();
        while self.has_next() && features.len() < limit {
            if let Some(id) = self.parse_next() {
                if let Some(feature) = self.tree.get(id).and_then(|n| n.feature()) {
                    features.push(feature.clone());
                }
            }
        }
        features
    }

    /// The root of the last parsed tree. Invalidated by
    /// [`KmlParser::cleanup`] and [`KmlParser::take_tree`].
    pub fn get_root(&self) -> Option<NodeId> {
        self.tree.root()
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    /// Hand the parsed tree to the caller. The parser is left with an empty
    /// tree.
    pub fn take_tree(&mut self) -> SceneTree {
        self.merging = false;
        std::mem::take(&mut self.tree)
    }

    /// The minimum refresh period from the NetworkLinkControl, in
    /// milliseconds. Zero means the requestor's own refresh applies.
    pub fn min_refresh_period_ms(&self) -> u64 {
        self.min_refresh_period_ms
    }

    /// Union of feature property names seen during the walk, in first-seen
    /// order, minus internal bookkeeping fields. Only available once
    /// traversal has completed.
    pub fn detected_columns(&self) -> Option<Vec<String>> {
        if self.has_next() {
            return None;
        }
        Some(
            self.column_order
                .iter()
                .filter(|c| !skipped_columns_regex().is_match(c))
                .cloned()
                .collect(),
        )
    }

    fn is_leaf_tag(&self, tag: &str) -> bool {
        LEAF_TAGS.contains(&tag) || self.schemas.is_schema_tag(tag)
    }

    // ─── Containers ──────────────────────────────────────────────────────

    fn step_container(
        &mut self,
        el: ElemId,
        tag: &str,
        parent_node: Option<NodeId>,
        top_idx: usize,
    ) -> KmlResult<(Option<NodeId>, Option<ParseFrame>)> {
        let mut node = KmlNode::container();
        self.apply_base_hooks(el, &mut node);
        self.default_label(el, tag, &mut node);

        let node_id = match self.attach(node, parent_node) {
            Some(id) => id,
            None => return Ok((None, None)),
        };

        if self.merging {
            // Mark all existing children for removal; merged children are
            // unmarked as they are found, the rest go in the sweep.
            self.tree.mark_children(node_id);
        }

        let dom = match self.dom.as_mut() {
            Some(dom) => dom,
            None => return Ok((Some(node_id), None)),
        };
        let children = dom.children(el).to_vec();
        if children.is_empty() {
            return Ok((Some(node_id), None));
        }

        let mut inherited = self.stack[top_idx].inherited.clone();
        if let Some(anon) = style::extract_styles(dom, el, &mut self.scope, &self.assets) {
            inherited.push(anon);
        }

        Ok((
            Some(node_id),
            Some(ParseFrame {
                children,
                index: 0,
                node: Some(node_id),
                inherited,
            }),
        ))
    }

    /// Attach a node under its parent (merging against stale children), or
    /// apply the root replacement rules when there is no parent.
    fn attach(&mut self, node: KmlNode, parent: Option<NodeId>) -> Option<NodeId> {
        if let Some(parent) = parent {
            return Some(self.tree.add_child(parent, node));
        }

        match self.tree.root() {
            None => {
                let id = self.tree.alloc(node);
                self.tree.set_root(id);
                Some(id)
            }
            Some(root) => {
                if self.tree.get(root).map(|n| n.label.as_str()) != Some(node.label.as_str()) {
                    // The root label changed, so this is a different
                    // document: replace the tree wholesale.
                    self.tree.free_subtree(root);
                    let id = self.tree.alloc(node);
                    self.tree.set_root(id);
                    Some(id)
                } else {
                    Some(root)
                }
            }
        }
    }

    /// Fold name/open/visibility children into the node being built.
    fn apply_base_hooks(&mut self, el: ElemId, node: &mut KmlNode) {
        let dom = match self.dom.as_ref() {
            Some(dom) => dom,
            None => return,
        };
        if matches!(node.payload, NodePayload::NetworkLink(_)) {
            node.state = TriState::Off;
        }
        for &child in dom.children(el) {
            match dom.name(child) {
                "name" => node.label = dom.text(child).to_string(),
                "open" => node.collapsed = dom.text(child).trim() != "1",
                "visibility" => {
                    let visible = matches!(dom.text(child).trim(), "1" | "true");
                    if !visible {
                        node.state = TriState::Off;
                    } else if matches!(node.payload, NodePayload::NetworkLink(_)) {
                        // Network links default to off; an explicit
                        // visibility element is the only override.
                        node.state = TriState::On;
                    }
                }
                _ => {}
            }
        }
    }

    fn default_label(&mut self, el: ElemId, tag: &str, node: &mut KmlNode) {
        if !node.label.is_empty() {
            return;
        }
        let id_attr = self
            .dom
            .as_ref()
            .and_then(|dom| dom.attr(el, "id"))
            .filter(|id| !id.is_empty());
        node.label = match id_attr {
            Some(id) => id.to_string(),
            None if tag == "kml" => "kmlroot".to_string(),
            None => {
                self.unnamed_count += 1;
                format!("Unnamed {} [{}]", self.unnamed_count, tag)
            }
        };
    }

    // ─── Leaves ──────────────────────────────────────────────────────────

    fn step_leaf(
        &mut self,
        el: ElemId,
        tag: &str,
        parent_node: Option<NodeId>,
        top_idx: usize,
    ) -> KmlResult<Option<NodeId>> {
        let payload = match tag {
            "NetworkLink" => self.read_network_link(el).map(NodePayload::NetworkLink),
            "GroundOverlay" => self.read_ground_overlay(el).map(NodePayload::ImageOverlay),
            "ScreenOverlay" => self.read_screen_overlay(el).map(NodePayload::ScreenOverlay),
            _ => self
                .read_feature(el, tag, top_idx)?
                .map(NodePayload::Feature),
        };

        // Leaf builders fail silently: no node, no error, walk continues.
        let payload = match payload {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let mut node = KmlNode::new(payload);
        self.apply_base_hooks(el, &mut node);
        self.default_label(el, tag, &mut node);
        Ok(self.attach(node, parent_node))
    }

    fn read_network_link(&mut self, el: ElemId) -> Option<NetworkLink> {
        let dom = self.dom.as_ref()?;
        let link = dom
            .child_by_name(el, "Link")
            .or_else(|| dom.child_by_name(el, "Url"))?;
        let href = dom.child_text(link, "href").filter(|h| !h.is_empty())?;

        let refresh_mode = match dom.child_text(link, "refreshMode").map(str::trim) {
            Some("onExpire") => RefreshMode::Expire,
            Some("onInterval") => RefreshMode::Interval,
            _ => RefreshMode::Change,
        };

        let refresh_interval_ms = if refresh_mode == RefreshMode::Interval {
            dom.child_text(link, "refreshInterval")
                .and_then(|t| t.trim().parse::<f64>().ok())
                .map(|secs| (secs * 1000.0) as u64)
        } else {
            None
        };

        Some(NetworkLink {
            href: href.to_string(),
            refresh_mode,
            refresh_interval_ms,
        })
    }

    fn read_ground_overlay(&mut self, el: ElemId) -> Option<ImageOverlay> {
        let dom = self.dom.as_ref()?;
        let name = dom.child_text(el, "name")?.to_string();
        let icon_el = dom.child_by_name(el, "Icon")?;
        let href = dom.child_text(icon_el, "href")?;
        let icon = self.assets.get(href).cloned().unwrap_or_else(|| href.to_string());

        let extent = if let Some(latlon) = dom.child_by_name(el, "LatLonBox") {
            let north = dom.child_text(latlon, "north")?.trim().parse::<f64>().ok()?;
            let south = dom.child_text(latlon, "south")?.trim().parse::<f64>().ok()?;
            let east = dom.child_text(latlon, "east")?.trim().parse::<f64>().ok()?;
            let west = dom.child_text(latlon, "west")?.trim().parse::<f64>().ok()?;
            [west, south, east, north]
        } else {
            // A quad can be skewed; reduce it to its bounding box by taking
            // the extremes across the four corners.
            let quad = dom.child_by_name(el, "LatLonQuad")?;
            let coords = geom::parse_coordinates(dom.child_text(quad, "coordinates")?);
            if coords.len() < 4 {
                return None;
            }
            let mut west = 360.0f64;
            let mut east = -360.0f64;
            let mut south = 180.0f64;
            let mut north = -180.0f64;
            for c in &coords[..4] {
                west = west.min(c.lon);
                east = east.max(c.lon);
                south = south.min(c.lat);
                north = north.max(c.lat);
            }
            [west, south, east, north]
        };

        Some(ImageOverlay { name, icon, extent })
    }

    fn read_screen_overlay(&mut self, el: ElemId) -> Option<ScreenOverlay> {
        let dom = self.dom.as_ref()?;

        // Explicitly hidden screen overlays are not emitted at all.
        if let Some(vis) = dom.child_text(el, "visibility") {
            if vis.trim() == "0" {
                return None;
            }
        }

        let name = dom.child_text(el, "name")?.to_string();
        let icon_el = dom.child_by_name(el, "Icon")?;
        let href = dom.child_text(icon_el, "href")?;
        let icon = self.assets.get(href).cloned().unwrap_or_else(|| href.to_string());

        let (width, height) = self.env.viewport.current_size();
        let anchor = parse_screen_xy(dom, dom.child_by_name(el, "screenXY")?, width, height)?;
        let size = parse_size_xy(dom, dom.child_by_name(el, "size")?, width, height)?;

        let id = format!("{}{}", self.session, self.overlay_count);
        self.overlay_count += 1;

        let name = match self.tree.root().and_then(|r| self.tree.get(r)) {
            Some(root) => format!("{} - {}", root.label, name),
            None => name,
        };

        Some(ScreenOverlay {
            id,
            name,
            icon,
            anchor,
            size,
        })
    }

    fn read_feature(
        &mut self,
        el: ElemId,
        tag: &str,
        top_idx: usize,
    ) -> KmlResult<Option<Feature>> {
        let Some(dom) = self.dom.as_ref() else {
            return Ok(None);
        };
        let mut props: HashMap<String, FieldValue> = HashMap::new();

        // Chained schema decode. Parent decoders run after the child's and
        // override values already set; this is inverted relative to normal
        // inheritance but downstream column detection depends on it.
        let (chain, reaches_placemark) = self.schemas.chain(tag);
        for set in &chain {
            for &child in dom.children(el) {
                if let Some(kind) = set.fields.get(dom.name(child)) {
                    if let Some(value) = kind.decode(dom.text(child)) {
                        props.insert(dom.name(child).to_string(), value);
                    }
                }
            }
        }
        if reaches_placemark {
            self.decode_placemark_fields(el, &mut props);
        }

        let Some(dom) = self.dom.as_ref() else {
            return Ok(None);
        };
        let mut geometry = geom::read_geometry(dom, el)?;
        if let Some(geom) = &geometry {
            if geom.is_point() {
                if let Some(coord) = geom.first_coordinate() {
                    props
                        .entry(FIELD_LAT.to_string())
                        .or_insert(FieldValue::Number(coord.lat));
                    props
                        .entry(FIELD_LON.to_string())
                        .or_insert(FieldValue::Number(coord.lon));
                    if let Some(alt) = coord.alt.filter(|a| *a != 0.0) {
                        props
                            .entry(FIELD_ALT.to_string())
                            .or_insert(FieldValue::Number(alt));
                    }
                }
            }
        }
        // Convert to the application projection.
        geometry = geometry.map(|g| self.env.transform.transform(g));

        // Duplicate network links reuse source ids, so combine the per-parse
        // session token with a sequence number for a unique feature id.
        self.feature_count += 1;
        let base_id = self.feature_count;
        let id = format!("{}#{}", self.session, base_id);
        props
            .entry(FIELD_ID.to_string())
            .or_insert(FieldValue::UInt(base_id));

        // Record columns before styles so style bookkeeping never shows up
        // in the column list.
        for key in props.keys() {
            if self.column_seen.insert(key.clone()) {
                self.column_order.push(key.clone());
            }
        }

        let Some(dom) = self.dom.as_ref() else {
            return Ok(None);
        };
        let style_url = props
            .get("styleUrl")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let mut inline = Vec::new();
        for style_el in dom.children_by_name(el, "Style") {
            inline.extend(style::read_style_element(dom, style_el, &self.assets));
        }
        let inline = if inline.is_empty() { None } else { Some(inline) };

        let (merged, highlight) = style::resolve(
            &self.scope,
            &self.stack[top_idx].inherited,
            style_url.as_deref(),
            inline.as_ref(),
        );

        if let Some(config) = &merged {
            if config.is_icon_config() {
                // Default the feature shape to an icon marker when the
                // merged style declares one.
                props
                    .entry("shape".to_string())
                    .or_insert_with(|| FieldValue::String("icon".to_string()));
                props
                    .entry("centerShape".to_string())
                    .or_insert_with(|| FieldValue::String("icon".to_string()));
            }
        }

        self.rewrite_description_assets(&mut props);

        Ok(Some(Feature {
            id,
            properties: props,
            geometry,
            style: merged,
            highlight_style: highlight,
        }))
    }

    /// The standard placemark field decoder, run when a schema chain
    /// terminates at Placemark (or for Placemark itself).
    fn decode_placemark_fields(&self, el: ElemId, props: &mut HashMap<String, FieldValue>) {
        let dom = match self.dom.as_ref() {
            Some(dom) => dom,
            None => return,
        };

        for field in ["name", "description", "address", "phoneNumber", "styleUrl"] {
            if let Some(text) = dom.child_text(el, field) {
                if !text.is_empty() {
                    props.insert(field.to_string(), FieldValue::String(text.to_string()));
                }
            }
        }

        if let Some(extended) = dom.child_by_name(el, "ExtendedData") {
            for data in dom.children_by_name(extended, "Data") {
                let name = match dom.attr(data, "name") {
                    Some(n) if !n.is_empty() => n.to_string(),
                    _ => continue,
                };
                if let Some(value) = dom.child_text(data, "value") {
                    props.insert(name, FieldValue::String(value.to_string()));
                }
            }

            for schema_data in dom.children_by_name(extended, "SchemaData") {
                let schema_name = dom
                    .attr(schema_data, "schemaUrl")
                    .map(|u| u.trim_start_matches('#').to_string());
                let Some(schema_name) = schema_name else { continue };
                let (chain, _) = self.schemas.chain(&schema_name);
                for set in &chain {
                    for &simple in &dom.children_by_name(schema_data, "SimpleData") {
                        let Some(field) = dom.attr(simple, "name") else { continue };
                        if let Some(kind) = set.fields.get(field) {
                            if let Some(value) = kind.decode(dom.text(simple)) {
                                props.insert(field.to_string(), value);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Support archive assets referenced from feature descriptions by
    /// rewriting img src values to their data URIs.
    fn rewrite_description_assets(&self, props: &mut HashMap<String, FieldValue>) {
        if self.assets.is_empty() {
            return;
        }
        if let Some(FieldValue::String(description)) = props.get_mut("description") {
            for (key, uri) in &self.assets {
                let double = format!("src=\"{}\"", key);
                let single = format!("src='{}'", key);
                let replacement = format!("src=\"{}\"", uri);
                if description.contains(&double) {
                    *description = description.replace(&double, &replacement);
                }
                if description.contains(&single) {
                    *description = description.replace(&single, &replacement);
                }
            }
        }
    }
}

fn parse_fraction_or_pixels(value: &str, units: &str, extent: f64, invert: bool) -> Option<ScreenCoord> {
    let value = value.trim().parse::<f64>().ok()?;
    if units == "fraction" {
        if value == 0.5 {
            Some(ScreenCoord::Center)
        } else if invert {
            Some(ScreenCoord::Pixels(extent - extent * value))
        } else {
            Some(ScreenCoord::Pixels(extent * value))
        }
    } else {
        Some(ScreenCoord::Pixels(value))
    }
}

fn parse_screen_xy(dom: &KmlDom, el: ElemId, width: f64, height: f64) -> Option<ScreenXY> {
    let x = parse_fraction_or_pixels(dom.attr(el, "x")?, dom.attr(el, "xunits")?, width, false)?;
    // Screen y grows downward while the KML fraction grows upward.
    let y = parse_fraction_or_pixels(dom.attr(el, "y")?, dom.attr(el, "yunits")?, height, true)?;
    Some(ScreenXY { x, y })
}

fn parse_size_xy(dom: &KmlDom, el: ElemId, width: f64, height: f64) -> Option<ScreenXY> {
    let axis = |value: &str, units: &str, extent: f64| -> Option<ScreenCoord> {
        let value = value.trim().parse::<f64>().ok()?;
        if units == "fraction" {
            // -1 = use native size, 0 = maintain aspect; neither maps to a
            // concrete pixel size here.
            if value == -1.0 || value == 0.0 {
                Some(ScreenCoord::Pixels(0.0))
            } else {
                Some(ScreenCoord::Pixels(extent * value))
            }
        } else {
            Some(ScreenCoord::Pixels(value))
        }
    };
    let x = axis(dom.attr(el, "x")?, dom.attr(el, "xunits")?, width)?;
    let y = axis(dom.attr(el, "y")?, dom.attr(el, "yunits")?, height)?;
    Some(ScreenXY { x, y })
}
