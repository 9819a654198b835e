use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::dom::{ElemId, KmlDom};

/// Icon (point marker) style attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IconStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Line stroke style attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

/// Polygon fill style attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<bool>,
}

/// Label (text) style attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

/// One merged style configuration. Each group is an attribute block that is
/// replaced wholesale when a higher-precedence config sets the same group
/// (shallow-overwrite merge, not deep-recursive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<LineStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poly: Option<PolyStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelStyle>,
}

impl StyleConfig {
    /// The global lowest-precedence default applied to every feature.
    pub fn default_style() -> StyleConfig {
        StyleConfig {
            line: Some(LineStyle {
                color: Some("ffffffff".to_string()),
                width: Some(2.0),
            }),
            poly: Some(PolyStyle {
                color: Some("7fffffff".to_string()),
                fill: Some(true),
                outline: Some(true),
            }),
            ..StyleConfig::default()
        }
    }

    /// Whether the merged config declares an icon marker.
    pub fn is_icon_config(&self) -> bool {
        self.icon.as_ref().is_some_and(|i| i.href.is_some())
    }

    /// Overwrite groups of `self` with groups present on `other`.
    pub fn merge_over(&mut self, other: &StyleConfig) {
        if other.icon.is_some() {
            self.icon = other.icon.clone();
        }
        if other.line.is_some() {
            self.line = other.line.clone();
        }
        if other.poly.is_some() {
            self.poly = other.poly.clone();
        }
        if other.label.is_some() {
            self.label = other.label.clone();
        }
    }
}

/// Per-parse registry of named style definitions plus StyleMap highlight
/// redirects. Discarded on cleanup.
#[derive(Debug, Default)]
pub struct StyleScope {
    styles: HashMap<String, Vec<StyleConfig>>,
    highlight: HashMap<String, Vec<StyleConfig>>,
}

impl StyleScope {
    /// Find a registered style set by id, ignoring any leading URL part
    /// before a `#` fragment.
    pub fn find(&self, id: &str, highlight: bool) -> Option<&Vec<StyleConfig>> {
        let id = match id.find('#') {
            Some(x) => &id[x + 1..],
            None => id,
        };
        let map = if highlight { &self.highlight } else { &self.styles };
        map.get(id)
    }

    #[cfg(test)]
    pub fn insert(&mut self, id: &str, set: Vec<StyleConfig>) {
        self.styles.insert(id.to_string(), set);
    }
}

/// Parse one `<Style>` element into a config set. Icon hrefs found in the
/// asset map are rewritten to their inline data URIs.
pub fn read_style_element(
    dom: &KmlDom,
    style: ElemId,
    assets: &HashMap<String, String>,
) -> Vec<StyleConfig> {
    let mut config = StyleConfig::default();

    if let Some(icon_style) = dom.child_by_name(style, "IconStyle") {
        let mut icon = IconStyle {
            scale: dom.child_text(icon_style, "scale").and_then(|t| t.parse().ok()),
            color: dom.child_text(icon_style, "color").map(|t| t.to_string()),
            ..IconStyle::default()
        };
        if let Some(icon_el) = dom.child_by_name(icon_style, "Icon") {
            icon.href = dom.child_text(icon_el, "href").map(|href| {
                assets.get(href).cloned().unwrap_or_else(|| href.to_string())
            });
        }
        config.icon = Some(icon);
    }

    if let Some(line_style) = dom.child_by_name(style, "LineStyle") {
        config.line = Some(LineStyle {
            color: dom.child_text(line_style, "color").map(|t| t.to_string()),
            width: dom.child_text(line_style, "width").and_then(|t| t.parse().ok()),
        });
    }

    if let Some(poly_style) = dom.child_by_name(style, "PolyStyle") {
        config.poly = Some(PolyStyle {
            color: dom.child_text(poly_style, "color").map(|t| t.to_string()),
            fill: dom.child_text(poly_style, "fill").map(|t| t.trim() != "0"),
            outline: dom.child_text(poly_style, "outline").map(|t| t.trim() != "0"),
        });
    }

    if let Some(label_style) = dom.child_by_name(style, "LabelStyle") {
        config.label = Some(LabelStyle {
            color: dom.child_text(label_style, "color").map(|t| t.to_string()),
            scale: dom.child_text(label_style, "scale").and_then(|t| t.parse().ok()),
        });
    }

    vec![config]
}

/// Extract all immediate style declarations under a container element.
///
/// Named styles register into the scope; an anonymous style is returned so
/// the walker can thread it down the frame stack as the container's
/// inherited default. An id collision renames the later style with a random
/// suffix and rewrites any styleUrl in the same subtree that pointed at the
/// original id.
pub fn extract_styles(
    dom: &mut KmlDom,
    el: ElemId,
    scope: &mut StyleScope,
    assets: &HashMap<String, String>,
) -> Option<Vec<StyleConfig>> {
    let mut anonymous = None;

    for style in dom.children_by_name(el, "Style") {
        let configs = read_style_element(dom, style, assets);
        let id = match dom.attr(style, "id") {
            Some(id) if !id.is_empty() => id.to_string(),
            // Styles without an id are the base styles for the container.
            _ => {
                anonymous = Some(configs);
                continue;
            }
        };

        let id = if scope.styles.contains_key(&id) {
            let new_id = format!("{}-{}", id, Uuid::new_v4().simple());
            rewrite_style_urls(dom, el, &id, &new_id);
            new_id
        } else {
            id
        };

        scope.styles.insert(id, configs);
    }

    for style_map in dom.children_by_name(el, "StyleMap") {
        let id = match dom.attr(style_map, "id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                error!("StyleMap tags must have an \"id\" attribute");
                continue;
            }
        };

        for pair in dom.children_by_name(style_map, "Pair") {
            let key = dom.child_text(pair, "key").map(|k| k.trim().to_string());
            let url = dom.child_text(pair, "styleUrl").map(|u| {
                u.trim().trim_start_matches('#').to_string()
            });

            if let (Some(key), Some(url)) = (key, url) {
                if let Some(set) = scope.styles.get(&url).cloned() {
                    match key.as_str() {
                        "normal" => {
                            scope.styles.insert(id.clone(), set);
                        }
                        "highlight" => {
                            scope.highlight.insert(id.clone(), set);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    anonymous
}

fn rewrite_style_urls(dom: &mut KmlDom, subtree: ElemId, old_id: &str, new_id: &str) {
    for el in dom.descendants(subtree) {
        if dom.name(el) == "styleUrl" && dom.text(el).trim_start_matches('#') == old_id {
            dom.set_text(el, format!("#{}", new_id));
        }
    }
}

/// Fold a style set onto an accumulated config. Only the first entry of a
/// multi-entry set is honored; extras are diagnostic-logged, not applied.
fn reduce_styles(config: Option<StyleConfig>, set: &[StyleConfig]) -> Option<StyleConfig> {
    if set.is_empty() {
        return config;
    }
    let mut config = config.unwrap_or_default();
    config.merge_over(&set[0]);
    if set.len() > 1 {
        warn!("An array of style configs with more than one entry was found!");
    }
    Some(config)
}

/// Compute the final merged style for a feature.
///
/// Precedence, ascending: the global default, each ancestor container's
/// anonymous style outermost-first, the styleUrl-referenced style, then any
/// inline style on the feature itself. Returns the merged config and the
/// StyleMap highlight config for the styleUrl, if any.
pub fn resolve(
    scope: &StyleScope,
    inherited: &[Vec<StyleConfig>],
    style_url: Option<&str>,
    inline: Option<&Vec<StyleConfig>>,
) -> (Option<StyleConfig>, Option<StyleConfig>) {
    let mut sets: Vec<&[StyleConfig]> = Vec::new();

    let default = vec![StyleConfig::default_style()];
    sets.push(&default);

    for set in inherited {
        sets.push(set);
    }

    let mut highlight = None;
    if let Some(url) = style_url {
        if let Some(set) = scope.find(url, false) {
            sets.push(set);
        }
        highlight = scope
            .find(url, true)
            .and_then(|set| set.first().cloned());
    }

    if let Some(set) = inline {
        sets.push(set);
    }

    let merged = sets.iter().fold(None, |acc, set| reduce_styles(acc, set));
    (merged, highlight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icon_config(href: &str) -> StyleConfig {
        StyleConfig {
            icon: Some(IconStyle {
                href: Some(href.to_string()),
                ..IconStyle::default()
            }),
            ..StyleConfig::default()
        }
    }

    #[test]
    fn test_group_replacement_is_shallow() {
        let mut base = StyleConfig {
            line: Some(LineStyle {
                color: Some("ff0000ff".to_string()),
                width: Some(4.0),
            }),
            ..StyleConfig::default()
        };
        // The overriding group has no width; the base width must not leak
        // through because groups replace wholesale.
        base.merge_over(&StyleConfig {
            line: Some(LineStyle {
                color: Some("ffff0000".to_string()),
                width: None,
            }),
            ..StyleConfig::default()
        });
        let line = base.line.unwrap();
        assert_eq!(line.color.as_deref(), Some("ffff0000"));
        assert_eq!(line.width, None);
    }

    #[test]
    fn test_precedence_inline_wins() {
        let mut scope = StyleScope::default();
        scope.insert("ref", vec![icon_config("from-url")]);

        let ancestor = vec![icon_config("from-ancestor")];
        let inline = vec![icon_config("from-inline")];

        let (merged, _) = resolve(&scope, &[ancestor.clone()], Some("#ref"), Some(&inline));
        assert_eq!(
            merged.unwrap().icon.unwrap().href.as_deref(),
            Some("from-inline")
        );

        let (merged, _) = resolve(&scope, &[ancestor.clone()], Some("#ref"), None);
        assert_eq!(
            merged.unwrap().icon.unwrap().href.as_deref(),
            Some("from-url")
        );

        let (merged, _) = resolve(&scope, &[ancestor], None, None);
        assert_eq!(
            merged.unwrap().icon.unwrap().href.as_deref(),
            Some("from-ancestor")
        );
    }

    #[test]
    fn test_extract_anonymous_style() {
        let mut dom = KmlDom::parse(
            "<Folder><Style><LineStyle><width>8</width></LineStyle></Style></Folder>",
        )
        .unwrap();
        let root = dom.root();
        let mut scope = StyleScope::default();
        let anon = extract_styles(&mut dom, root, &mut scope, &HashMap::new()).unwrap();
        assert_eq!(anon[0].line.as_ref().unwrap().width, Some(8.0));
    }

    #[test]
    fn test_collision_renames_and_rewrites_references() {
        let mut dom = KmlDom::parse(
            r#"<Folder>
                 <Style id="s"><LineStyle><width>1</width></LineStyle></Style>
                 <Placemark><styleUrl>#s</styleUrl></Placemark>
               </Folder>"#,
        )
        .unwrap();
        let root = dom.root();
        let mut scope = StyleScope::default();
        scope.insert("s", vec![StyleConfig::default()]);

        extract_styles(&mut dom, root, &mut scope, &HashMap::new());

        let style_url = dom.find_first("styleUrl").unwrap();
        let rewritten = dom.text(style_url).to_string();
        assert_ne!(rewritten, "#s");
        // The rewritten reference must resolve to the renamed registration.
        assert!(scope.find(&rewritten, false).is_some());
    }

    #[test]
    fn test_style_map_highlight_redirect() {
        let mut dom = KmlDom::parse(
            r#"<Document>
                 <Style id="n"><LineStyle><width>1</width></LineStyle></Style>
                 <Style id="h"><LineStyle><width>3</width></LineStyle></Style>
                 <StyleMap id="m">
                   <Pair><key>normal</key><styleUrl>#n</styleUrl></Pair>
                   <Pair><key>highlight</key><styleUrl>#h</styleUrl></Pair>
                 </StyleMap>
               </Document>"#,
        )
        .unwrap();
        let root = dom.root();
        let mut scope = StyleScope::default();
        extract_styles(&mut dom, root, &mut scope, &HashMap::new());

        let normal = scope.find("m", false).unwrap();
        assert_eq!(normal[0].line.as_ref().unwrap().width, Some(1.0));
        let highlight = scope.find("m", true).unwrap();
        assert_eq!(highlight[0].line.as_ref().unwrap().width, Some(3.0));
    }
}
